//! Layout tracking and intent-named barriers.
//!
//! Every image records its current layout, and each factory both describes
//! the transition and advances the tracked layout in the same step. The
//! factories are named for the dependency they enforce (read-after-write,
//! write-after-write, ...) rather than for the flag tuples they expand to,
//! so the pass schedule reads as a dependency graph.

use ash::vk;

/// A layout/access transition before it is attached to a concrete image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Tracks the current layout of one image across barrier construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutTracker {
    current: vk::ImageLayout,
}

impl LayoutTracker {
    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    /// Forces the tracked layout without a barrier. Used when a transition
    /// is recorded outside the factories (upload staging).
    pub fn assume(&mut self, layout: vk::ImageLayout) {
        self.current = layout;
    }

    /// First use of an image with undefined contents.
    pub fn start(&mut self, layout: vk::ImageLayout) -> Transition {
        self.current = layout;
        Transition {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: layout,
            src_access: vk::AccessFlags::NONE,
            dst_access: vk::AccessFlags::MEMORY_WRITE,
        }
    }

    /// Read-after-write: make a finished write visible to a reader in the
    /// general layout. `src_access` names the write being waited on.
    pub fn raw(&mut self, src_access: vk::AccessFlags) -> Transition {
        let old_layout = self.current;
        self.current = vk::ImageLayout::GENERAL;
        Transition {
            old_layout,
            new_layout: vk::ImageLayout::GENERAL,
            src_access,
            dst_access: vk::AccessFlags::MEMORY_READ,
        }
    }

    /// Write-after-read in the general layout.
    pub fn war(&mut self) -> Transition {
        Transition {
            old_layout: vk::ImageLayout::GENERAL,
            new_layout: vk::ImageLayout::GENERAL,
            src_access: vk::AccessFlags::MEMORY_READ,
            dst_access: vk::AccessFlags::MEMORY_WRITE,
        }
    }

    /// Write-after-write: order two writes to the same image.
    pub fn waw(&mut self) -> Transition {
        let old_layout = self.current;
        self.current = vk::ImageLayout::GENERAL;
        Transition {
            old_layout,
            new_layout: vk::ImageLayout::GENERAL,
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::MEMORY_WRITE,
        }
    }

    /// Read-after-read with a layout change for the next reader.
    pub fn rar(&mut self, layout: vk::ImageLayout) -> Transition {
        let old_layout = self.current;
        self.current = layout;
        Transition {
            old_layout,
            new_layout: layout,
            src_access: vk::AccessFlags::MEMORY_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Hand the image to samplers in the read-only layout. `src_access`
    /// names the access the sampling must wait on.
    pub fn sample(&mut self, src_access: vk::AccessFlags) -> Transition {
        let old_layout = self.current;
        self.current = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Transition {
            old_layout,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_access,
            dst_access: vk::AccessFlags::MEMORY_READ,
        }
    }

    /// Hand the image to the transfer stage as a copy source.
    pub fn blit(&mut self) -> Transition {
        let old_layout = self.current;
        self.current = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        Transition {
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::MEMORY_READ,
        }
    }

    /// Prepare the image as a copy destination for host readback.
    pub fn readback(&mut self) -> Transition {
        let old_layout = self.current;
        self.current = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        Transition {
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_access: vk::AccessFlags::NONE,
            dst_access: vk::AccessFlags::MEMORY_WRITE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_transitions_from_undefined() {
        let mut tracker = LayoutTracker::default();
        let t = tracker.start(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.src_access, vk::AccessFlags::NONE);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_WRITE);
        assert_eq!(tracker.current(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn raw_lands_in_general_from_any_layout() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let t = tracker.raw(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_READ);
        assert_eq!(tracker.current(), vk::ImageLayout::GENERAL);
    }

    #[test]
    fn waw_orders_writes_in_place() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::GENERAL);
        let t = tracker.waw();
        assert_eq!(t.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.src_access, vk::AccessFlags::MEMORY_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_WRITE);
    }

    #[test]
    fn war_stays_general() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::GENERAL);
        let t = tracker.war();
        assert_eq!(t.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.src_access, vk::AccessFlags::MEMORY_READ);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_WRITE);
    }

    #[test]
    fn rar_retargets_the_layout() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::GENERAL);
        let t = tracker.rar(vk::ImageLayout::GENERAL);
        assert_eq!(t.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(t.src_access, vk::AccessFlags::MEMORY_READ);
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn sample_lands_in_read_only() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::GENERAL);
        let t = tracker.sample(vk::AccessFlags::MEMORY_WRITE);
        assert_eq!(t.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(tracker.current(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn blit_and_readback_target_transfer_layouts() {
        let mut tracker = LayoutTracker::default();
        tracker.start(vk::ImageLayout::GENERAL);
        let t = tracker.blit();
        assert_eq!(t.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(t.src_access, vk::AccessFlags::MEMORY_WRITE);

        let mut tracker = LayoutTracker::default();
        let t = tracker.readback();
        assert_eq!(t.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(t.src_access, vk::AccessFlags::NONE);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_WRITE);
    }
}
