//! Delta trait: rules for fusing values that arrive over overlap links.

/// *Delta* encapsulates restriction & fusion for a shared value `V`.
pub trait Delta<V>: Sized {
    /// What a *restricted* value looks like (often identical to `V`).
    type Part: Send;

    /// Extract the part of `v` that travels on one link.
    fn restrict(v: &V) -> Self::Part;

    /// Merge an incoming fragment into the local value.
    fn fuse(local: &mut V, incoming: Self::Part);
}

/// Copy-overwrites-local; used to broadcast owner values to ghosts.
#[derive(Copy, Clone)]
pub struct CopyDelta;

impl<V: Clone + Send> Delta<V> for CopyDelta {
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        v.clone()
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }
}

/// Additive delta for partial sums split across partitions.
#[derive(Copy, Clone)]
pub struct AddDelta;

impl<V> Delta<V> for AddDelta
where
    V: std::ops::AddAssign + Copy + Send,
{
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        *v
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local += incoming;
    }
}

/// Keeps the smaller value; isotropic sizes agree on the finest request.
#[derive(Copy, Clone)]
pub struct MinDelta;

impl<V> Delta<V> for MinDelta
where
    V: PartialOrd + Copy + Send,
{
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        *v
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        if incoming < *local {
            *local = incoming;
        }
    }
}

/// Keeps the larger value; used to OR refinement marks.
#[derive(Copy, Clone)]
pub struct MaxDelta;

impl<V> Delta<V> for MaxDelta
where
    V: PartialOrd + Copy + Send,
{
    type Part = V;
    #[inline]
    fn restrict(v: &V) -> V {
        *v
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        if incoming > *local {
            *local = incoming;
        }
    }
}
