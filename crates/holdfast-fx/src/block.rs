//! Registry-side pin of a controller's parameter block.

use crate::params::EffectParameters;
use holdfast_core::RetainedResource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared parameter block. Its address stays fixed for the controller's life.
pub(crate) type SharedBlock<P> = Arc<Mutex<P>>;

/// Keeps a parameter block alive under one channel handle.
///
/// Released either by the channel's free notification or by the controller
/// dropping the association. Either way `freed` is raised, which is how the
/// controller learns its channel is gone.
pub(crate) struct BlockPin<P: EffectParameters> {
    block: Mutex<Option<SharedBlock<P>>>,
    freed: Arc<AtomicBool>,
}

impl<P: EffectParameters> BlockPin<P> {
    pub(crate) fn new(block: &SharedBlock<P>, freed: &Arc<AtomicBool>) -> Self {
        Self {
            block: Mutex::new(Some(Arc::clone(block))),
            freed: Arc::clone(freed),
        }
    }
}

impl<P: EffectParameters> RetainedResource for BlockPin<P> {
    fn release(&self) {
        let block = self.block.lock().take();
        if block.is_some() {
            self.freed.store(true, Ordering::Release);
            tracing::trace!(kind = ?P::KIND, "parameter block unpinned");
        }
    }

    fn label(&self) -> &'static str {
        "parameter block"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Echo;

    #[test]
    fn test_release_raises_freed_once() {
        let block: SharedBlock<Echo> = Arc::new(Mutex::new(Echo::default()));
        let freed = Arc::new(AtomicBool::new(false));
        let pin = BlockPin::new(&block, &freed);
        assert_eq!(Arc::strong_count(&block), 2);

        pin.release();
        assert!(freed.load(Ordering::Acquire));
        assert_eq!(Arc::strong_count(&block), 1);

        pin.release();
        assert_eq!(Arc::strong_count(&block), 1);
    }
}
