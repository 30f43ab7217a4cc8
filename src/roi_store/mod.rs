//! RoiStore - Preloaded Region-of-Interest Bitmaps
//!
//! ## Responsibilities
//!
//! - Load per-(channel, direction) ROI bitmaps once at startup
//! - Serve immutable, shared read-only masks to the analyzer
//!
//! Assets are grayscale images named `{channel}_{direction}.png` (e.g.
//! `3_up.png`), thresholded at > 127. A missing asset directory is not
//! fatal: the store starts empty and every occupancy report is empty too.

use crate::error::Result;
use crate::models::{Direction, RegionMask};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable ROI mask store
pub struct RoiStore {
    masks: HashMap<(u32, Direction), Arc<RegionMask>>,
}

impl RoiStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            masks: HashMap::new(),
        }
    }

    /// Insert a mask for a (channel, direction) pair
    pub fn insert(&mut self, channel_id: u32, direction: Direction, mask: RegionMask) {
        self.masks.insert((channel_id, direction), Arc::new(mask));
    }

    /// Load all ROI bitmaps from a directory.
    ///
    /// Files that do not match the naming scheme are skipped; files that
    /// match but fail to decode are logged and skipped.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut store = Self::new();

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "ROI mask directory missing, starting empty");
            return Ok(store);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some((channel_id, direction)) = parse_mask_name(&path) else {
                continue;
            };

            match image::open(&path) {
                Ok(img) => {
                    let mask = RegionMask::from_luma(&img.to_luma8());
                    tracing::debug!(
                        channel_id = channel_id,
                        direction = %direction.as_str(),
                        width = mask.width(),
                        height = mask.height(),
                        area = mask.area(),
                        "Loaded ROI mask"
                    );
                    store.insert(channel_id, direction, mask);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to decode ROI mask, skipping"
                    );
                }
            }
        }

        tracing::info!(count = store.len(), dir = %dir.display(), "ROI masks loaded");
        Ok(store)
    }

    /// Get the mask for a (channel, direction) pair
    pub fn get(&self, channel_id: u32, direction: Direction) -> Option<Arc<RegionMask>> {
        self.masks.get(&(channel_id, direction)).cloned()
    }

    /// All (direction, mask) pairs configured for a channel, in direction order
    pub fn masks_for(&self, channel_id: u32) -> Vec<(Direction, Arc<RegionMask>)> {
        Direction::ALL
            .iter()
            .filter_map(|d| self.get(channel_id, *d).map(|m| (*d, m)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

impl Default for RoiStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `{channel}_{direction}.png` into its components
fn parse_mask_name(path: &Path) -> Option<(u32, Direction)> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("png") {
        return None;
    }

    let (id_part, dir_part) = stem.split_once('_')?;
    let channel_id = id_part.parse().ok()?;
    let direction = Direction::parse(dir_part)?;
    Some((channel_id, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_mask_name() {
        assert_eq!(
            parse_mask_name(&PathBuf::from("/masks/3_up.png")),
            Some((3, Direction::Up))
        );
        assert_eq!(
            parse_mask_name(&PathBuf::from("12_low.PNG")),
            Some((12, Direction::Low))
        );
        assert_eq!(parse_mask_name(&PathBuf::from("3_side.png")), None);
        assert_eq!(parse_mask_name(&PathBuf::from("up_3.png")), None);
        assert_eq!(parse_mask_name(&PathBuf::from("3_up.jpg")), None);
        assert_eq!(parse_mask_name(&PathBuf::from("readme.txt")), None);
    }

    #[test]
    fn test_masks_for_returns_direction_order() {
        let mut store = RoiStore::new();
        store.insert(1, Direction::Low, RegionMask::empty(4, 4));
        store.insert(1, Direction::Up, RegionMask::empty(4, 4));
        store.insert(2, Direction::Up, RegionMask::empty(4, 4));

        let masks = store.masks_for(1);
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].0, Direction::Up);
        assert_eq!(masks[1].0, Direction::Low);
        assert!(store.masks_for(9).is_empty());
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let store = RoiStore::load(Path::new("/nonexistent/roi/dir")).unwrap();
        assert!(store.is_empty());
    }
}
