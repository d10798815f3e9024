// The reactivity layer: revision tags and their clock, references that pair a lazily
// computed value with a tag, the revalidation cache used by branch assertions and dynamic
// content, keyed iteration artifacts for `each`, and the synchronizer that reconciles a
// keyed list against its previous rendering.

//! Tags, references, iteration and reconciliation.

pub mod cache;
pub mod iterable;
pub mod reference;
pub mod sync;
pub mod tag;

pub use cache::{ReferenceCache, Revalidation};
pub use iterable::{
    ItemRefs, IterablePresenceReference, Iterable, IterationArtifacts, IterationItem, KeyPath,
    ReferenceIterator, ValueIterable,
};
pub use reference::{
    bool_reference, child, is_const, null_reference, path, undefined_reference,
    ClassListReference, ComputedReference, ConcatReference, ConditionalReference,
    ConstReference, PathReference, Reference, ReferenceRef, UpdatableReference,
};
pub use sync::{IteratorSynchronizer, SyncTarget};
pub use tag::{combine, DirtyableTag, Revision, RevisionClock, Tag, UpdatableTag};
