//! Hierarchical box machines: state cells, guards, the containment tree,
//! its runner, and the lexical builder.
//!
//! The pieces compose bottom up. [`Bag`]s hold values in a [`Mine`]
//! (process-local) or [`Dock`] (durable); a [`Need`] is a compiled guard
//! over those cells; acts ([`Deed`], [`Poke`], [`Tract`], [`End`]) run in
//! explicit [`Context`]s on the boxes of a tree; the [`Boxer`] advances the
//! active pile one scheduler cycle at a time; and the [`Maker`] builds the
//! whole work from a lexical description.

mod acting;
mod bagging;
mod boxing;
mod making;
mod needing;

pub use acting::{
    Act, Acted, Context, Deed, Dest, End, Former, Poke, Registry, Scene, Scope, Spec, Tract,
};
pub use bagging::{tokey, tokeys, validate_key, validate_name, Bag, Dock, Mine, Val, REAT};
pub use boxing::{BoxId, BoxNode, Boxer, BoxerDoer, Pile};
pub use making::{Maker, Over};
pub use needing::Need;
