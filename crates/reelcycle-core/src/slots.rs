//! The two playback slots, addressed by role.
//!
//! Surfaces never move. A swap only flips which slot the "active" label
//! points at.

use std::sync::Arc;

use crate::surface::{ SlotId, Surface };


#[derive( Debug )]
pub struct SlotPair<S> {
    slots: [Arc<S>; 2],
    active: SlotId,
}


impl<S: Surface> SlotPair<S> {
    /// Slot A starts active.
    pub fn new( slot_a: S, slot_b: S ) -> Self {
        Self {
            slots: [ Arc::new( slot_a ), Arc::new( slot_b ) ],
            active: SlotId::A,
        }
    }


    pub fn active_id( &self ) -> SlotId {
        self.active
    }


    pub fn inactive_id( &self ) -> SlotId {
        self.active.other()
    }


    pub fn active( &self ) -> ( SlotId, Arc<S> ) {
        ( self.active, self.get( self.active ) )
    }


    pub fn inactive( &self ) -> ( SlotId, Arc<S> ) {
        let id = self.inactive_id();
        ( id, self.get( id ) )
    }


    pub fn get( &self, id: SlotId ) -> Arc<S> {
        Arc::clone( &self.slots[ id.index() ] )
    }


    /// Exchanges the active and inactive roles.
    pub fn swap( &mut self ) {
        self.active = self.active.other();
    }


    pub fn iter( &self ) -> impl Iterator<Item = &Arc<S>> {
        self.slots.iter()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::sim::SimBackend;


    #[test]
    fn test_swap_flips_roles() {
        let backend = SimBackend::default();
        let mut pair = SlotPair::new( backend.surface( "A" ), backend.surface( "B" ) );
        assert_eq!( pair.active_id(), SlotId::A );
        assert_eq!( pair.inactive().1.name(), "B" );

        pair.swap();
        assert_eq!( pair.active_id(), SlotId::B );
        assert_eq!( pair.inactive_id(), SlotId::A );
        assert_eq!( pair.active().1.name(), "B" );

        pair.swap();
        assert_eq!( pair.active_id(), SlotId::A );
    }


    #[test]
    fn test_get_is_stable_across_swaps() {
        let backend = SimBackend::default();
        let mut pair = SlotPair::new( backend.surface( "A" ), backend.surface( "B" ) );
        let before = pair.get( SlotId::B );
        pair.swap();
        assert!( Arc::ptr_eq( &before, &pair.get( SlotId::B ) ) );
        assert_eq!( pair.iter().count(), 2 );
    }
}
