// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Platform plane topologies.
//!
//! A [`Platform`] is selected once at startup. It decides how many planes
//! of each type exist, which z-order configurations the hardware can
//! realize, and which concrete plane backs each entry of a configuration.
//!
//! [`Platform::Generic`] is driven by a [`GenericPlatform`] description.
//! [`Platform::Anniedale`] follows the fixed pipe tables of that display
//! controller: planes are named by letter (`A`-`C` primary, `D`-`F` sprite,
//! `G`-`H` overlay, `I`-`K` cursor) and each legal overlay arrangement maps
//! to a short list of plane strings.

use alloc::vec::Vec;

use crate::display::DisplayId;
use crate::plane::{DisplayPlane, MIN_DATA_BUFFER_COUNT, PlaneError, PlaneKey, PlaneType};
use crate::zorder::ZOrderConfig;

/// Number of planes of each type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaneCounts {
    /// Primary planes, one per pipe.
    pub primary: u32,
    /// Sprite planes.
    pub sprite: u32,
    /// Overlay planes.
    pub overlay: u32,
    /// Cursor planes, one per pipe.
    pub cursor: u32,
}

impl PlaneCounts {
    /// Number of planes of `plane_type`.
    #[must_use]
    pub const fn of(self, plane_type: PlaneType) -> u32 {
        match plane_type {
            PlaneType::Primary => self.primary,
            PlaneType::Sprite => self.sprite,
            PlaneType::Overlay => self.overlay,
            PlaneType::Cursor => self.cursor,
        }
    }

    /// Total number of planes.
    #[must_use]
    pub const fn total(self) -> u32 {
        self.primary + self.sprite + self.overlay + self.cursor
    }
}

/// Where the primary plane must sit in a generic platform's stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimaryPosition {
    /// Primary is always the lowest entry.
    #[default]
    Bottom,
    /// Primary is the highest entry below the cursor.
    Top,
    /// Primary may sit anywhere.
    Any,
}

/// Description of a platform without fixed z-order tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericPlatform {
    /// Planes per type.
    pub counts: PlaneCounts,
    /// Maximum entries in one configuration.
    pub max_layers: usize,
    /// Maximum overlay entries in one configuration.
    pub max_overlays: usize,
    /// Placement rule for the primary plane.
    pub primary_position: PrimaryPosition,
    /// Mapping cache size of each plane.
    pub plane_buffer_count: usize,
}

impl GenericPlatform {
    /// Single pipe with one primary, two sprites and one overlay.
    #[must_use]
    pub const fn single_pipe() -> Self {
        Self {
            counts: PlaneCounts {
                primary: 1,
                sprite: 2,
                overlay: 1,
                cursor: 1,
            },
            max_layers: 4,
            max_overlays: 1,
            primary_position: PrimaryPosition::Bottom,
            plane_buffer_count: MIN_DATA_BUFFER_COUNT,
        }
    }

    /// Two pipes sharing three sprites and two overlays.
    #[must_use]
    pub const fn dual_pipe() -> Self {
        Self {
            counts: PlaneCounts {
                primary: 2,
                sprite: 3,
                overlay: 2,
                cursor: 2,
            },
            max_layers: 5,
            max_overlays: 2,
            primary_position: PrimaryPosition::Bottom,
            plane_buffer_count: MIN_DATA_BUFFER_COUNT,
        }
    }
}

/// The closed set of supported display controllers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// A description-driven platform.
    Generic(GenericPlatform),
    /// The Anniedale display controller.
    Anniedale,
}

/// Concrete plane chosen for one configuration entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AssignedPlane {
    pub(crate) key: PlaneKey,
    pub(crate) slot: u32,
}

const ANNIEDALE_COUNTS: PlaneCounts = PlaneCounts {
    primary: 3,
    sprite: 3,
    overlay: 2,
    cursor: 3,
};

const ANNIEDALE_MAX_LAYERS: usize = 5;

/// Pipe A: overlay-position index to plane string.
const PIPE_A_ZORDER: [(u32, &str); 12] = [
    (0, "ADEF"),
    (1, "GEF"),
    (1, "HEF"),
    (2, "AGEF"),
    (2, "AHEF"),
    (3, "GHF"),
    (4, "ADGF"),
    (4, "ADHF"),
    (6, "AGHF"),
    (8, "ADEG"),
    (8, "ADEH"),
    (12, "ADGH"),
];

/// Pipe B: overlay-position index to plane string.
const PIPE_B_ZORDER: [(u32, &str); 10] = [
    (0, "BD"),
    (1, "GBD"),
    (1, "HBD"),
    (2, "BGD"),
    (2, "BHD"),
    (3, "GHBD"),
    (4, "BDG"),
    (4, "BDH"),
    (6, "BGHD"),
    (12, "BDGH"),
];

/// Decodes an Anniedale plane letter.
fn anniedale_plane(nickname: u8) -> Option<PlaneKey> {
    let (plane_type, base) = match nickname {
        b'A'..=b'C' => (PlaneType::Primary, b'A'),
        b'D'..=b'F' => (PlaneType::Sprite, b'D'),
        b'G'..=b'H' => (PlaneType::Overlay, b'G'),
        b'I'..=b'K' => (PlaneType::Cursor, b'I'),
        _ => return None,
    };
    Some(PlaneKey::new(plane_type, u32::from(nickname - base)))
}

/// Returns the Anniedale letter of `key`.
#[must_use]
pub fn anniedale_nickname(key: PlaneKey) -> Option<char> {
    let base = match key.plane_type {
        PlaneType::Primary => b'A',
        PlaneType::Sprite => b'D',
        PlaneType::Overlay => b'G',
        PlaneType::Cursor => b'I',
    };
    if key.index >= ANNIEDALE_COUNTS.of(key.plane_type) {
        return None;
    }
    let offset = u8::try_from(key.index).ok()?;
    Some(char::from(base + offset))
}

impl Platform {
    /// The Anniedale display controller.
    #[must_use]
    pub const fn anniedale() -> Self {
        Self::Anniedale
    }

    /// Planes per type.
    #[must_use]
    pub const fn counts(&self) -> PlaneCounts {
        match self {
            Self::Generic(generic) => generic.counts,
            Self::Anniedale => ANNIEDALE_COUNTS,
        }
    }

    /// Creates plane `index` of `plane_type`.
    #[must_use]
    pub fn alloc_plane(&self, index: u32, plane_type: PlaneType) -> DisplayPlane {
        let buffer_count = match self {
            Self::Generic(generic) => generic.plane_buffer_count,
            Self::Anniedale => MIN_DATA_BUFFER_COUNT,
        };
        DisplayPlane::new(PlaneKey::new(plane_type, index), buffer_count)
    }

    /// Returns `true` if `config` can be realized on `display`, ignoring
    /// which planes are currently free.
    #[must_use]
    pub fn is_valid_zorder(&self, display: DisplayId, config: &ZOrderConfig) -> bool {
        match self {
            Self::Generic(generic) => generic_is_valid(generic, display, config),
            Self::Anniedale => anniedale_is_valid(display, config),
        }
    }

    /// Number of planes of `plane_type` that `display` could still take,
    /// given the availability mask of that type.
    #[must_use]
    pub fn free_planes(&self, display: DisplayId, plane_type: PlaneType, available: u32) -> u32 {
        let count = self.counts().of(plane_type);
        match plane_type {
            PlaneType::Primary | PlaneType::Cursor => {
                u32::from(display.0 < count && available & (1 << display.0) != 0)
            }
            PlaneType::Sprite if matches!(self, Self::Anniedale) => {
                // Only sprite D can move to pipe B; E and F stay on pipe A.
                let stop = match display {
                    DisplayId::PRIMARY => count,
                    DisplayId::EXTERNAL => 1,
                    _ => 0,
                };
                (available & low_mask(stop)).count_ones()
            }
            PlaneType::Sprite | PlaneType::Overlay => (available & low_mask(count)).count_ones(),
        }
    }

    /// Picks a concrete plane for every entry of `config`, or fails without
    /// side effects. `is_free` reports plane availability.
    pub(crate) fn resolve(
        &self,
        display: DisplayId,
        config: &ZOrderConfig,
        is_free: &dyn Fn(PlaneKey) -> bool,
    ) -> Result<Vec<AssignedPlane>, PlaneError> {
        match self {
            Self::Generic(generic) => generic_resolve(generic, display, config, is_free),
            Self::Anniedale => anniedale_resolve(display, config, is_free),
        }
    }
}

const fn low_mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1 << bits) - 1 }
}

fn cursor_is_topmost(config: &ZOrderConfig) -> bool {
    config
        .iter()
        .enumerate()
        .all(|(i, l)| l.plane_type != PlaneType::Cursor || i + 1 == config.len())
}

fn generic_is_valid(generic: &GenericPlatform, display: DisplayId, config: &ZOrderConfig) -> bool {
    let size = config.len();
    if size == 0 || size > generic.max_layers {
        log::trace!("invalid z-order size {size}");
        return false;
    }
    if display.0 >= generic.counts.primary {
        log::trace!("{display:?} has no pipe");
        return false;
    }
    if config.count(PlaneType::Overlay) > generic.max_overlays {
        return false;
    }
    if !cursor_is_topmost(config) || config.count(PlaneType::Cursor) > 1 {
        log::trace!("cursor must be the single topmost entry");
        return false;
    }
    if config.count(PlaneType::Primary) > 1 {
        return false;
    }
    for plane_type in [PlaneType::Sprite, PlaneType::Overlay] {
        let wanted = u32::try_from(config.count(plane_type)).unwrap_or(u32::MAX);
        if wanted > generic.counts.of(plane_type) {
            return false;
        }
    }
    if let Some(primary) = config.first(PlaneType::Primary) {
        let below_cursor = size - config.count(PlaneType::Cursor);
        let ok = match generic.primary_position {
            PrimaryPosition::Bottom => primary == 0,
            PrimaryPosition::Top => primary + 1 == below_cursor,
            PrimaryPosition::Any => true,
        };
        if !ok {
            log::trace!("primary at {primary} violates {:?}", generic.primary_position);
            return false;
        }
    }
    true
}

fn generic_resolve(
    generic: &GenericPlatform,
    display: DisplayId,
    config: &ZOrderConfig,
    is_free: &dyn Fn(PlaneKey) -> bool,
) -> Result<Vec<AssignedPlane>, PlaneError> {
    let mut chosen: Vec<AssignedPlane> = Vec::with_capacity(config.len());
    for (slot, entry) in (0_u32..).zip(config.iter()) {
        let key = match entry.plane_type {
            PlaneType::Primary | PlaneType::Cursor => {
                let key = PlaneKey::new(entry.plane_type, display.0);
                (display.0 < generic.counts.of(entry.plane_type) && is_free(key)).then_some(key)
            }
            PlaneType::Sprite | PlaneType::Overlay => (0..generic.counts.of(entry.plane_type))
                .map(|index| PlaneKey::new(entry.plane_type, index))
                .find(|key| is_free(*key) && !chosen.iter().any(|c| c.key == *key)),
        };
        let Some(key) = key else {
            log::trace!("no free {:?} plane for {display:?}", entry.plane_type);
            return Err(PlaneError::NoFreePlane(entry.plane_type));
        };
        chosen.push(AssignedPlane { key, slot });
    }
    Ok(chosen)
}

fn anniedale_is_valid(display: DisplayId, config: &ZOrderConfig) -> bool {
    let size = config.len();
    if size == 0 || size > ANNIEDALE_MAX_LAYERS {
        log::trace!("invalid z-order size {size}");
        return false;
    }
    let sprites = config.rgb_count();
    match display {
        DisplayId::PRIMARY => {
            let first_overlay = config.first(PlaneType::Overlay);
            if first_overlay.is_none() && sprites > 4 {
                log::trace!("at most 4 RGB planes without an overlay");
                return false;
            }
            if first_overlay == Some(0) && sprites > 2 {
                log::trace!("at most 2 RGB planes above a bottom overlay");
                return false;
            }
            true
        }
        DisplayId::EXTERNAL => {
            if sprites > 2 {
                log::error!("{sprites} RGB planes requested, pipe B supports 2");
                return false;
            }
            true
        }
        _ => {
            log::error!("{display:?} has no pipe");
            false
        }
    }
}

fn anniedale_resolve(
    display: DisplayId,
    config: &ZOrderConfig,
    is_free: &dyn Fn(PlaneKey) -> bool,
) -> Result<Vec<AssignedPlane>, PlaneError> {
    let table: &[(u32, &str)] = match display {
        DisplayId::PRIMARY => &PIPE_A_ZORDER,
        DisplayId::EXTERNAL => &PIPE_B_ZORDER,
        _ => return Err(PlaneError::InvalidDisplay(display)),
    };

    let index: u32 = (0_u32..)
        .zip(config.iter())
        .filter(|(_, l)| l.plane_type == PlaneType::Overlay)
        .map(|(i, _)| 1_u32 << i)
        .sum();

    table
        .iter()
        .filter(|(i, _)| *i == index)
        .find_map(|(_, zorder)| {
            let planes = anniedale_try(display, config, zorder.as_bytes(), is_free)?;
            log::trace!("z-order {zorder} assigned on {display:?}");
            Some(planes)
        })
        .ok_or(PlaneError::InvalidZOrder(display))
}

fn anniedale_try(
    display: DisplayId,
    config: &ZOrderConfig,
    zorder: &[u8],
    is_free: &dyn Fn(PlaneKey) -> bool,
) -> Option<Vec<AssignedPlane>> {
    let size = config.len();
    let mut keys = Vec::with_capacity(size);
    for (i, entry) in config.iter().enumerate() {
        let key = if entry.plane_type == PlaneType::Cursor {
            if i + 1 != size {
                log::error!("cursor must be the topmost entry");
                return None;
            }
            PlaneKey::new(PlaneType::Cursor, display.0)
        } else {
            anniedale_plane(*zorder.get(i)?)?
        };
        if !is_free(key) {
            log::trace!("{key:?} is not available");
            return None;
        }
        if key == PlaneKey::new(PlaneType::Overlay, 1) && !entry.transform.is_identity() {
            log::trace!("overlay C cannot transform");
            return None;
        }
        keys.push(key);
    }

    let primary_active = keys.iter().any(|k| k.plane_type == PlaneType::Primary);
    Some(
        (0_u32..)
            .zip(keys)
            .map(|(i, key)| {
                let slot = if !primary_active && key.plane_type == PlaneType::Overlay {
                    i + 1
                } else {
                    i
                };
                AssignedPlane { key, slot }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Transform;
    use crate::zorder::ZOrderLayer;

    fn config(types: &[PlaneType]) -> ZOrderConfig {
        let mut config = ZOrderConfig::new();
        for (i, t) in types.iter().enumerate() {
            config.push(ZOrderLayer::new(*t, i, u32::try_from(i).unwrap()));
        }
        config
    }

    fn letters(planes: &[AssignedPlane]) -> alloc::string::String {
        planes
            .iter()
            .map(|p| anniedale_nickname(p.key).unwrap())
            .collect()
    }

    use PlaneType::{Cursor, Overlay, Primary, Sprite};

    #[test]
    fn nicknames_round_trip() {
        for letter in b'A'..=b'K' {
            let key = anniedale_plane(letter).unwrap();
            assert_eq!(anniedale_nickname(key), Some(char::from(letter)));
        }
        assert!(anniedale_plane(b'L').is_none());
    }

    #[test]
    fn anniedale_validity_rules() {
        let p = Platform::anniedale();
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[])));
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Sprite; 6])));
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Sprite; 5])));
        assert!(p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Primary, Sprite, Sprite, Sprite])));
        assert!(!p.is_valid_zorder(
            DisplayId::PRIMARY,
            &config(&[Overlay, Sprite, Sprite, Sprite])
        ));
        assert!(p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Overlay, Sprite, Sprite])));
        assert!(!p.is_valid_zorder(DisplayId::EXTERNAL, &config(&[Primary, Sprite, Sprite])));
        assert!(!p.is_valid_zorder(DisplayId::VIRTUAL, &config(&[Primary])));
    }

    #[test]
    fn anniedale_pipe_a_tables() {
        let p = Platform::anniedale();
        let all_free = |_: PlaneKey| true;
        let got = p
            .resolve(DisplayId::PRIMARY, &config(&[Primary, Sprite, Sprite]), &all_free)
            .unwrap();
        assert_eq!(letters(&got), "ADE");

        let got = p
            .resolve(DisplayId::PRIMARY, &config(&[Overlay, Sprite]), &all_free)
            .unwrap();
        assert_eq!(letters(&got), "GE");
        assert_eq!(got[0].slot, 1, "overlay shifts up without a primary plane");
        assert_eq!(got[1].slot, 1);
    }

    #[test]
    fn anniedale_falls_back_to_second_row() {
        let p = Platform::anniedale();
        let overlay_a_busy = |k: PlaneKey| k != PlaneKey::new(Overlay, 0);
        let got = p
            .resolve(DisplayId::PRIMARY, &config(&[Primary, Overlay]), &overlay_a_busy)
            .unwrap();
        assert_eq!(letters(&got), "AH");
    }

    #[test]
    fn anniedale_overlay_c_cannot_rotate() {
        let p = Platform::anniedale();
        let mut cfg = ZOrderConfig::new();
        cfg.push(ZOrderLayer::new(Primary, 0, 0));
        cfg.push(ZOrderLayer::new(Overlay, 1, 1).with_transform(Transform::ROT_90));
        let overlay_a_busy = |k: PlaneKey| k != PlaneKey::new(Overlay, 0);
        assert_eq!(
            p.resolve(DisplayId::PRIMARY, &cfg, &overlay_a_busy),
            Err(PlaneError::InvalidZOrder(DisplayId::PRIMARY))
        );
    }

    #[test]
    fn anniedale_cursor_on_own_pipe() {
        let p = Platform::anniedale();
        let got = p
            .resolve(DisplayId::EXTERNAL, &config(&[Primary, Cursor]), &|_| true)
            .unwrap();
        assert_eq!(letters(&got), "BJ");
        assert!(
            p.resolve(DisplayId::EXTERNAL, &config(&[Cursor, Primary]), &|_| true)
                .is_err(),
            "cursor below another plane"
        );
    }

    #[test]
    fn anniedale_external_sprites() {
        let p = Platform::anniedale();
        assert_eq!(p.free_planes(DisplayId::EXTERNAL, Sprite, 0b111), 1);
        assert_eq!(p.free_planes(DisplayId::EXTERNAL, Sprite, 0b110), 0);
        assert_eq!(p.free_planes(DisplayId::PRIMARY, Sprite, 0b101), 2);
        assert_eq!(p.free_planes(DisplayId::EXTERNAL, Primary, 0b010), 1);
        assert_eq!(p.free_planes(DisplayId::PRIMARY, Primary, 0b010), 0);
    }

    #[test]
    fn generic_takes_lowest_free_index() {
        let p = Platform::Generic(GenericPlatform::dual_pipe());
        let sprite0_busy = |k: PlaneKey| k != PlaneKey::new(Sprite, 0);
        let got = p
            .resolve(DisplayId::PRIMARY, &config(&[Primary, Sprite, Sprite]), &sprite0_busy)
            .unwrap();
        let keys: Vec<_> = got.iter().map(|a| a.key).collect();
        assert_eq!(
            keys,
            [
                PlaneKey::new(Primary, 0),
                PlaneKey::new(Sprite, 1),
                PlaneKey::new(Sprite, 2)
            ]
        );
        assert_eq!(
            p.resolve(
                DisplayId::PRIMARY,
                &config(&[Primary, Sprite, Sprite, Sprite]),
                &sprite0_busy
            ),
            Err(PlaneError::NoFreePlane(Sprite))
        );
    }

    #[test]
    fn generic_validity_rules() {
        let p = Platform::Generic(GenericPlatform::single_pipe());
        assert!(p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Primary, Overlay, Cursor])));
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Overlay, Primary])));
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Primary, Cursor, Sprite])));
        assert!(!p.is_valid_zorder(DisplayId::PRIMARY, &config(&[Primary, Overlay, Overlay])));
        assert!(!p.is_valid_zorder(DisplayId::EXTERNAL, &config(&[Primary])));
    }
}
