use super::{Patch, PhasedPatch};
use crate::os::OperatingSystemImage;

/// Several patches applied as one: every phase is the concatenation of the
/// patches' phases in patch order, and the image boots if any patch boots.
pub struct CompositePatch {
    patches: Vec<Box<dyn Patch>>,
}

impl CompositePatch {
    pub fn new(patches: Vec<Box<dyn Patch>>) -> Self {
        Self { patches }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

impl Patch for CompositePatch {
    fn name(&self) -> String {
        self.patches
            .iter()
            .map(|patch| patch.name())
            .collect::<Vec<_>>()
            .join(" + ")
    }

    fn phased(&self, image: &OperatingSystemImage) -> PhasedPatch {
        self.patches
            .iter()
            .map(|patch| patch.phased(image))
            .fold(PhasedPatch::empty(""), PhasedPatch::merge)
    }
}
