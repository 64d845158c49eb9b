//! Scoped ownership of a pooled resource

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::provider::ResourceProvider;
use crate::shared::SharedPool;

/// A resource on loan from a [`SharedPool`].
///
/// Dropping the lease releases the resource back to the pool on every exit
/// path. Use [`into_inner`](Self::into_inner) to take the resource out; it
/// then stays on loan until handed to [`SharedPool::release`].
pub struct Lease<P: ResourceProvider> {
    resource: Option<P::Resource>,
    pool: SharedPool<P>,
}

impl<P: ResourceProvider> Lease<P> {
    pub(crate) fn new(resource: P::Resource, pool: SharedPool<P>) -> Self {
        Self {
            resource: Some(resource),
            pool,
        }
    }

    /// Detach the resource without releasing it.
    #[must_use]
    pub fn into_inner(mut self) -> P::Resource {
        self.resource.take().expect("lease used after into_inner")
    }

    /// Pool this lease belongs to
    pub fn pool(&self) -> &SharedPool<P> {
        &self.pool
    }
}

impl<P: ResourceProvider> Deref for Lease<P> {
    type Target = P::Resource;

    fn deref(&self) -> &P::Resource {
        self.resource.as_ref().expect("lease used after into_inner")
    }
}

impl<P: ResourceProvider> DerefMut for Lease<P> {
    fn deref_mut(&mut self) -> &mut P::Resource {
        self.resource.as_mut().expect("lease used after into_inner")
    }
}

impl<P: ResourceProvider> Drop for Lease<P> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}

impl<P> fmt::Debug for Lease<P>
where
    P: ResourceProvider,
    P::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}
