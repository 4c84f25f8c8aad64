//! Root tracking using a shadow stack.
//!
//! Every attached mutator owns one [`ShadowStack`]. Handles pushed on it are
//! treated as roots by every mark pass until they are popped.

use crate::object::ObjRef;

// ============================================================================
// ShadowStack - Root tracking structure
// ============================================================================

/// A shadow stack of root handles.
///
/// Frames give scope-based rooting: [`ShadowStack::pop_frame`] drops every
/// root pushed since the matching [`ShadowStack::push_frame`].
#[derive(Debug, Default)]
pub struct ShadowStack {
    roots: Vec<ObjRef>,
    frame_markers: Vec<usize>,
}

impl ShadowStack {
    /// Create a new empty shadow stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            roots: Vec::new(),
            frame_markers: Vec::new(),
        }
    }

    /// Register a new root.
    pub fn push(&mut self, obj: ObjRef) {
        self.roots.push(obj);
    }

    /// Unregister the most recent registration of `obj`.
    ///
    /// Returns `false` if `obj` was not rooted here.
    pub fn pop(&mut self, obj: ObjRef) -> bool {
        if let Some(pos) = self.roots.iter().rposition(|&r| r == obj) {
            self.roots.remove(pos);
            // Keep frame markers pointing inside the stack.
            for marker in &mut self.frame_markers {
                if *marker > pos {
                    *marker -= 1;
                }
            }
            true
        } else {
            false
        }
    }

    /// Number of roots, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if there are no roots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over all roots, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.roots.iter().copied()
    }

    /// Clear all roots and frames.
    pub fn clear(&mut self) {
        self.roots.clear();
        self.frame_markers.clear();
    }

    /// Open a frame.
    pub fn push_frame(&mut self) {
        self.frame_markers.push(self.roots.len());
    }

    /// Close the innermost frame, unregistering every root added since.
    ///
    /// Returns `false` if no frame was open.
    pub fn pop_frame(&mut self) -> bool {
        if let Some(marker) = self.frame_markers.pop() {
            self.roots.truncate(marker);
            true
        } else {
            false
        }
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frame_markers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(i: u32) -> ObjRef {
        ObjRef::new(i, 0)
    }

    #[test]
    fn test_push_pop() {
        let mut stack = ShadowStack::new();
        stack.push(obj(1));
        stack.push(obj(2));
        stack.push(obj(1));

        assert!(stack.pop(obj(1)));
        assert_eq!(stack.iter().collect::<Vec<_>>(), vec![obj(1), obj(2)]);
        assert!(!stack.pop(obj(7)));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_frames() {
        let mut stack = ShadowStack::new();
        stack.push(obj(1));
        stack.push_frame();
        stack.push(obj(2));
        stack.push(obj(3));
        assert_eq!(stack.depth(), 1);

        assert!(stack.pop_frame());
        assert_eq!(stack.iter().collect::<Vec<_>>(), vec![obj(1)]);
        assert!(!stack.pop_frame());
    }

    #[test]
    fn test_pop_below_frame_adjusts_marker() {
        let mut stack = ShadowStack::new();
        stack.push(obj(1));
        stack.push_frame();
        stack.push(obj(2));

        assert!(stack.pop(obj(1)));
        assert!(stack.pop_frame());
        assert!(stack.is_empty());
    }
}
