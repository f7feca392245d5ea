// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plane pools and per-frame plane assignment.
//!
//! The [`DisplayPlaneManager`] owns every [`DisplayPlane`] the platform
//! describes, grouped in one pool per [`PlaneType`]. Each pool tracks two
//! bitmasks:
//!
//! - **free**: planes nobody holds;
//! - **reclaimed**: planes released at the start of a frame that may still
//!   be scanning out. They can be handed out again as-is; whatever is left
//!   reclaimed at the next [`disable_reclaimed_planes`] is turned off and
//!   merged back into free.
//!
//! [`assign_planes`] is all-or-nothing: when any entry cannot get a plane or
//! the driver refuses to enable one, every plane taken for the call is put
//! back where it came from.
//!
//! [`disable_reclaimed_planes`]: DisplayPlaneManager::disable_reclaimed_planes
//! [`assign_planes`]: DisplayPlaneManager::assign_planes

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::buffer::BufferHandle;
use crate::buffer_manager::{BufferManager, Gralloc};
use crate::display::DisplayId;
use crate::plane::{DisplayPlane, PlaneDriver, PlaneError, PlaneKey, PlaneType};
use crate::platform::Platform;
use crate::zorder::ZOrderConfig;

const POOLS: usize = PlaneType::ALL.len();
const MAX_PLANES_PER_TYPE: u32 = 32;

/// Availability of one plane pool, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanePoolSnapshot {
    /// Plane type.
    pub plane_type: PlaneType,
    /// Planes in the pool.
    pub count: u32,
    /// Free bitmask.
    pub free: u32,
    /// Reclaimed bitmask.
    pub reclaimed: u32,
}

/// State of one plane, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneSnapshot {
    /// Plane identity.
    pub key: PlaneKey,
    /// Whether the plane is scanning out.
    pub enabled: bool,
    /// Display the plane was last assigned to.
    pub display: DisplayId,
    /// Z-order slot.
    pub zorder: u32,
    /// Bound buffer.
    pub buffer: BufferHandle,
}

/// The plane manager as seen by diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaneManagerSnapshot {
    /// One entry per plane type.
    pub pools: Vec<PlanePoolSnapshot>,
    /// Every plane.
    pub planes: Vec<PlaneSnapshot>,
}

/// Owns the platform's planes and hands them out per display.
pub struct DisplayPlaneManager {
    platform: Platform,
    driver: Box<dyn PlaneDriver>,
    planes: [Vec<DisplayPlane>; POOLS],
    free: [u32; POOLS],
    reclaimed: [u32; POOLS],
}

impl DisplayPlaneManager {
    /// Creates every plane `platform` describes. Fails if there are none.
    pub fn new(platform: Platform, driver: Box<dyn PlaneDriver>) -> Result<Self, PlaneError> {
        let counts = platform.counts();
        if counts.total() == 0 {
            log::error!("platform describes no planes");
            return Err(PlaneError::NoPlanes);
        }

        let mut planes: [Vec<DisplayPlane>; POOLS] = Default::default();
        let mut free = [0_u32; POOLS];
        for plane_type in PlaneType::ALL {
            let mut count = counts.of(plane_type);
            if count > MAX_PLANES_PER_TYPE {
                log::warn!("{count} {plane_type:?} planes, using {MAX_PLANES_PER_TYPE}");
                count = MAX_PLANES_PER_TYPE;
            }
            let pool = plane_type.pool();
            planes[pool] = (0..count)
                .map(|index| platform.alloc_plane(index, plane_type))
                .collect();
            free[pool] = if count == 32 { u32::MAX } else { (1 << count) - 1 };
        }

        log::debug!(
            "plane manager: {} primary, {} sprite, {} overlay, {} cursor",
            counts.primary,
            counts.sprite,
            counts.overlay,
            counts.cursor
        );
        Ok(Self {
            platform,
            driver,
            planes,
            free,
            reclaimed: [0; POOLS],
        })
    }

    /// The platform this manager was built for.
    #[must_use]
    pub const fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The plane driver.
    pub fn driver_mut(&mut self) -> &mut dyn PlaneDriver {
        &mut *self.driver
    }

    /// Returns plane `key`.
    #[must_use]
    pub fn plane(&self, key: PlaneKey) -> Option<&DisplayPlane> {
        self.planes[key.plane_type.pool()].get(key.index as usize)
    }

    /// Returns plane `key` for modification.
    pub fn plane_mut(&mut self, key: PlaneKey) -> Option<&mut DisplayPlane> {
        self.planes[key.plane_type.pool()].get_mut(key.index as usize)
    }

    /// Returns plane `key` together with the driver, for enabling or
    /// disabling it.
    pub fn plane_and_driver(
        &mut self,
        key: PlaneKey,
    ) -> Option<(&mut DisplayPlane, &mut dyn PlaneDriver)> {
        let plane = self.planes[key.plane_type.pool()].get_mut(key.index as usize)?;
        Some((plane, &mut *self.driver))
    }

    /// Iterates over every plane.
    pub fn planes(&self) -> impl Iterator<Item = &DisplayPlane> + '_ {
        self.planes.iter().flatten()
    }

    fn bit(key: PlaneKey) -> u32 {
        if key.index >= MAX_PLANES_PER_TYPE {
            0
        } else {
            1 << key.index
        }
    }

    /// Returns `true` if plane `key` can be handed out.
    #[must_use]
    pub fn is_free_plane(&self, key: PlaneKey) -> bool {
        let pool = key.plane_type.pool();
        (self.free[pool] | self.reclaimed[pool]) & Self::bit(key) != 0
    }

    /// Number of `plane_type` planes `display` could still take.
    #[must_use]
    pub fn free_planes(&self, display: DisplayId, plane_type: PlaneType) -> u32 {
        let pool = plane_type.pool();
        self.platform
            .free_planes(display, plane_type, self.free[pool] | self.reclaimed[pool])
    }

    fn take(&mut self, key: PlaneKey) -> Option<bool> {
        let pool = key.plane_type.pool();
        let bit = Self::bit(key);
        if self.reclaimed[pool] & bit != 0 {
            self.reclaimed[pool] &= !bit;
            Some(true)
        } else if self.free[pool] & bit != 0 {
            self.free[pool] &= !bit;
            Some(false)
        } else {
            None
        }
    }

    /// Takes plane `index` of `plane_type`, preferring a reclaimed plane.
    pub fn get_plane(&mut self, plane_type: PlaneType, index: u32) -> Option<&mut DisplayPlane> {
        let key = PlaneKey::new(plane_type, index);
        self.plane(key)?;
        self.take(key)?;
        self.plane_mut(key)
    }

    /// Takes the lowest-indexed available plane of `plane_type`, preferring
    /// reclaimed planes.
    pub fn get_any_plane(&mut self, plane_type: PlaneType) -> Option<&mut DisplayPlane> {
        let pool = plane_type.pool();
        let mask = if self.reclaimed[pool] != 0 {
            self.reclaimed[pool]
        } else {
            self.free[pool]
        };
        if mask == 0 {
            return None;
        }
        self.get_plane(plane_type, mask.trailing_zeros())
    }

    /// Returns plane `key` to the free pool.
    pub fn put_plane(&mut self, key: PlaneKey) {
        let pool = key.plane_type.pool();
        let bit = Self::bit(key);
        if self.free[pool] & bit != 0 {
            log::warn!("{key:?} was already free");
            return;
        }
        self.free[pool] |= bit;
    }

    /// Marks plane `key` reclaimable. Its mappings stay cached so the same
    /// layer can keep the plane next frame.
    pub fn reclaim_plane(&mut self, key: PlaneKey) {
        let pool = key.plane_type.pool();
        let bit = Self::bit(key);
        if self.reclaimed[pool] & bit != 0 {
            log::warn!("{key:?} was already reclaimed");
            return;
        }
        log::trace!("reclaim {key:?}");
        self.reclaimed[pool] |= bit;
    }

    /// Disables and resets every reclaimed plane, then merges it back into
    /// the free pool. Planes the hardware has not released yet stay
    /// reclaimed and are retried next time.
    pub fn disable_reclaimed_planes<G: Gralloc>(&mut self, buffers: &mut BufferManager<G>) {
        for plane_type in PlaneType::ALL {
            let pool = plane_type.pool();
            let mut pending = self.reclaimed[pool];
            while pending != 0 {
                let index = pending.trailing_zeros();
                let bit = 1 << index;
                pending &= !bit;

                let Some(plane) = self.planes[pool].get_mut(index as usize) else {
                    continue;
                };
                if let Err(err) = plane.disable(&mut *self.driver) {
                    log::warn!("failed to disable {:?}: {err}", plane.key());
                    continue;
                }
                if !self.driver.is_disabled(plane.key()) {
                    continue;
                }
                plane.reset(buffers);
                self.reclaimed[pool] &= !bit;
                self.free[pool] |= bit;
            }
        }
    }

    /// Returns `true` if no overlay plane is scanning out.
    #[must_use]
    pub fn is_overlay_planes_disabled(&self) -> bool {
        self.planes[PlaneType::Overlay.pool()]
            .iter()
            .all(|plane| !plane.is_enabled() && self.driver.is_disabled(plane.key()))
    }

    /// Returns `true` if `config` can be realized on `display`.
    #[must_use]
    pub fn is_valid_zorder(&self, display: DisplayId, config: &ZOrderConfig) -> bool {
        self.platform.is_valid_zorder(display, config)
    }

    /// Binds a plane to every entry of `config` and enables it.
    ///
    /// On success each entry's `plane` (and, where the platform decides,
    /// `plane_type`) is filled in. On failure nothing changes.
    pub fn assign_planes(
        &mut self,
        display: DisplayId,
        config: &mut ZOrderConfig,
    ) -> Result<(), PlaneError> {
        if !display.is_physical() {
            return Err(PlaneError::InvalidDisplay(display));
        }
        if !self.is_valid_zorder(display, config) {
            return Err(PlaneError::InvalidZOrder(display));
        }
        let assigned = self
            .platform
            .resolve(display, config, &|key| self.is_free_plane(key))?;

        // (key, came from reclaimed, was enabled before)
        let mut taken: Vec<(PlaneKey, bool, bool)> = Vec::with_capacity(assigned.len());
        let mut result = Ok(());
        for a in &assigned {
            let Some(from_reclaimed) = self.take(a.key) else {
                result = Err(PlaneError::NoFreePlane(a.key.plane_type));
                break;
            };
            let Some(plane) = self.planes[a.key.plane_type.pool()].get_mut(a.key.index as usize)
            else {
                result = Err(PlaneError::UnknownPlane(a.key));
                break;
            };
            let was_enabled = plane.is_enabled();
            taken.push((a.key, from_reclaimed, was_enabled));
            if let Err(err) = plane.enable(&mut *self.driver) {
                log::error!("failed to enable {:?}: {err}", a.key);
                result = Err(err);
                break;
            }
        }

        if let Err(err) = result {
            for (key, from_reclaimed, was_enabled) in taken.into_iter().rev() {
                if !was_enabled {
                    if let Some(plane) =
                        self.planes[key.plane_type.pool()].get_mut(key.index as usize)
                    {
                        if let Err(err) = plane.disable(&mut *self.driver) {
                            log::warn!("failed to disable {key:?} while rolling back: {err}");
                        }
                    }
                }
                let pool = key.plane_type.pool();
                if from_reclaimed {
                    self.reclaimed[pool] |= Self::bit(key);
                } else {
                    self.free[pool] |= Self::bit(key);
                }
            }
            return Err(err);
        }

        for (entry, a) in config.as_mut_slice().iter_mut().zip(&assigned) {
            if let Some(plane) = self.plane_mut(a.key) {
                plane.set_display(display);
                plane.set_zorder(a.slot);
            }
            entry.plane = Some(a.key);
            entry.plane_type = a.key.plane_type;
        }
        Ok(())
    }

    /// Disables and resets every plane and returns all of them to the free
    /// pool.
    pub fn deinitialize<G: Gralloc>(&mut self, buffers: &mut BufferManager<G>) {
        for pool in 0..POOLS {
            for plane in &mut self.planes[pool] {
                if let Err(err) = plane.disable(&mut *self.driver) {
                    log::warn!("failed to disable {:?}: {err}", plane.key());
                }
                plane.reset(buffers);
            }
            let count = u32::try_from(self.planes[pool].len()).unwrap_or(MAX_PLANES_PER_TYPE);
            self.free[pool] = if count >= 32 { u32::MAX } else { (1 << count) - 1 };
            self.reclaimed[pool] = 0;
        }
    }

    /// Captures pool and plane state for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> PlaneManagerSnapshot {
        let pools = PlaneType::ALL
            .iter()
            .map(|&plane_type| {
                let pool = plane_type.pool();
                PlanePoolSnapshot {
                    plane_type,
                    count: u32::try_from(self.planes[pool].len()).unwrap_or(u32::MAX),
                    free: self.free[pool],
                    reclaimed: self.reclaimed[pool],
                }
            })
            .collect();
        let planes = self
            .planes()
            .map(|plane| PlaneSnapshot {
                key: plane.key(),
                enabled: plane.is_enabled(),
                display: plane.display(),
                zorder: plane.zorder(),
                buffer: plane.current_buffer(),
            })
            .collect();
        PlaneManagerSnapshot { pools, planes }
    }
}

impl fmt::Debug for DisplayPlaneManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayPlaneManager")
            .field("platform", &self.platform)
            .field("free", &self.free)
            .field("reclaimed", &self.reclaimed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_manager::BufferManagerConfig;
    use crate::platform::{GenericPlatform, PlaneCounts};
    use crate::testing::{FakeDriver, FakeGralloc};
    use crate::zorder::ZOrderLayer;
    use PlaneType::{Overlay, Primary, Sprite};

    fn manager(platform: Platform) -> (DisplayPlaneManager, FakeDriver) {
        let driver = FakeDriver::default();
        let manager = DisplayPlaneManager::new(platform, Box::new(driver.clone())).unwrap();
        (manager, driver)
    }

    fn config(types: &[PlaneType]) -> ZOrderConfig {
        let mut config = ZOrderConfig::new();
        for (i, t) in types.iter().enumerate() {
            config.push(ZOrderLayer::new(*t, i, u32::try_from(i).unwrap()));
        }
        config
    }

    #[test]
    fn empty_platform_is_an_error() {
        let empty = Platform::Generic(GenericPlatform {
            counts: PlaneCounts::default(),
            ..GenericPlatform::single_pipe()
        });
        assert_eq!(
            DisplayPlaneManager::new(empty, Box::new(FakeDriver::default())).err(),
            Some(PlaneError::NoPlanes)
        );
    }

    #[test]
    fn assign_binds_and_enables() {
        let (mut pm, driver) = manager(Platform::Generic(GenericPlatform::dual_pipe()));
        let mut cfg = config(&[Primary, Sprite, Overlay]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        let keys: Vec<_> = cfg.iter().map(|e| e.plane.unwrap()).collect();
        assert_eq!(
            keys,
            [
                PlaneKey::new(Primary, 0),
                PlaneKey::new(Sprite, 0),
                PlaneKey::new(Overlay, 0)
            ]
        );
        for key in keys {
            assert!(pm.plane(key).unwrap().is_enabled());
            assert!(!pm.is_free_plane(key));
            assert!(driver.is_enabled(key));
        }
        assert_eq!(pm.free_planes(DisplayId::PRIMARY, Sprite), 2);
        assert_eq!(pm.free_planes(DisplayId::PRIMARY, Primary), 0);
        assert_eq!(pm.free_planes(DisplayId::EXTERNAL, Primary), 1);
    }

    #[test]
    fn exhaustion_leaves_state_untouched() {
        let (mut pm, _driver) = manager(Platform::Generic(GenericPlatform::dual_pipe()));
        let mut first = config(&[Primary, Sprite, Sprite]);
        pm.assign_planes(DisplayId::PRIMARY, &mut first).unwrap();
        let before = pm.snapshot();

        let mut second = config(&[Primary, Sprite, Sprite]);
        assert_eq!(
            pm.assign_planes(DisplayId::EXTERNAL, &mut second),
            Err(PlaneError::NoFreePlane(Sprite))
        );
        assert_eq!(pm.snapshot(), before);
        assert!(second.iter().all(|e| e.plane.is_none()));
    }

    #[test]
    fn overlay_requests_beyond_the_pool_fail_cleanly() {
        let platform = Platform::Generic(GenericPlatform {
            counts: PlaneCounts {
                primary: 1,
                sprite: 2,
                overlay: 3,
                cursor: 1,
            },
            max_layers: 5,
            max_overlays: 4,
            ..GenericPlatform::single_pipe()
        });
        let (mut pm, _driver) = manager(platform);
        let before = pm.snapshot();

        let mut four = config(&[Overlay, Overlay, Overlay, Overlay]);
        assert!(pm.assign_planes(DisplayId::PRIMARY, &mut four).is_err());
        assert_eq!(pm.snapshot(), before);

        let mut cfg = config(&[Primary, Sprite, Sprite]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        let keys: Vec<_> = cfg.iter().map(|e| e.plane.unwrap()).collect();
        assert_eq!(
            keys,
            [
                PlaneKey::new(Primary, 0),
                PlaneKey::new(Sprite, 0),
                PlaneKey::new(Sprite, 1)
            ]
        );
        assert_eq!(pm.free_planes(DisplayId::PRIMARY, Overlay), 3);
        assert_eq!(pm.free_planes(DisplayId::PRIMARY, PlaneType::Cursor), 1);

        pm.get_any_plane(Overlay).unwrap();
        let before = pm.snapshot();
        let mut three = config(&[Overlay, Overlay, Overlay]);
        assert_eq!(
            pm.assign_planes(DisplayId::PRIMARY, &mut three),
            Err(PlaneError::NoFreePlane(Overlay))
        );
        assert_eq!(pm.snapshot(), before);
    }

    #[test]
    fn driver_failure_rolls_back() {
        let (mut pm, driver) = manager(Platform::Generic(GenericPlatform::dual_pipe()));
        driver.fail_enable(PlaneKey::new(Overlay, 0));
        let before = pm.snapshot();
        let mut cfg = config(&[Primary, Sprite, Overlay]);
        assert_eq!(
            pm.assign_planes(DisplayId::PRIMARY, &mut cfg),
            Err(PlaneError::Driver(PlaneKey::new(Overlay, 0)))
        );
        assert_eq!(pm.snapshot(), before);
        assert!(!driver.is_enabled(PlaneKey::new(Primary, 0)), "rolled back");
    }

    #[test]
    fn rollback_survives_disable_failure() {
        let (mut pm, driver) = manager(Platform::Generic(GenericPlatform::dual_pipe()));
        let primary = PlaneKey::new(Primary, 0);
        driver.fail_enable(PlaneKey::new(Overlay, 0));
        driver.fail_disable(primary);
        let mut cfg = config(&[Primary, Sprite, Overlay]);
        assert_eq!(
            pm.assign_planes(DisplayId::PRIMARY, &mut cfg),
            Err(PlaneError::Driver(PlaneKey::new(Overlay, 0)))
        );
        assert!(pm.is_free_plane(primary), "plane returned to the pool");
        assert!(pm.is_free_plane(PlaneKey::new(Sprite, 0)));
        assert!(!driver.is_enabled(PlaneKey::new(Sprite, 0)), "other planes still rolled back");
        assert!(driver.is_enabled(primary), "driver refused to disable");
    }

    #[test]
    fn invalid_zorder_is_refused() {
        let (mut pm, _driver) = manager(Platform::anniedale());
        let mut cfg = config(&[Sprite, Sprite, Sprite, Sprite, Sprite]);
        assert!(!pm.is_valid_zorder(DisplayId::PRIMARY, &cfg));
        assert_eq!(
            pm.assign_planes(DisplayId::PRIMARY, &mut cfg),
            Err(PlaneError::InvalidZOrder(DisplayId::PRIMARY))
        );
        let mut cfg = config(&[Primary]);
        assert_eq!(
            pm.assign_planes(DisplayId::VIRTUAL, &mut cfg),
            Err(PlaneError::InvalidDisplay(DisplayId::VIRTUAL))
        );
    }

    #[test]
    fn anniedale_overrides_plane_type() {
        let (mut pm, _driver) = manager(Platform::anniedale());
        let mut cfg = config(&[Sprite, Sprite]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        assert_eq!(cfg.as_slice()[0].plane_type, Primary, "A is a primary plane");
        assert_eq!(cfg.as_slice()[1].plane, Some(PlaneKey::new(Sprite, 0)));
    }

    #[test]
    fn reclaimed_planes_are_reused_then_disabled() {
        let gralloc = FakeGralloc::new();
        let mut bm = BufferManager::new(gralloc, BufferManagerConfig { pool_size: 8 });
        let (mut pm, driver) = manager(Platform::Generic(GenericPlatform::single_pipe()));

        let mut cfg = config(&[Primary, Sprite]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        for entry in &cfg {
            pm.reclaim_plane(entry.plane.unwrap());
        }
        assert!(pm.is_free_plane(PlaneKey::new(Sprite, 0)));

        // Next frame keeps only the primary plane.
        let mut cfg = config(&[Primary]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        assert!(driver.is_enabled(PlaneKey::new(Primary, 0)));

        pm.disable_reclaimed_planes(&mut bm);
        let sprite = pm.plane(PlaneKey::new(Sprite, 0)).unwrap();
        assert!(!sprite.is_enabled());
        assert!(pm.plane(PlaneKey::new(Primary, 0)).unwrap().is_enabled());
        let snap = pm.snapshot();
        assert_eq!(snap.pools[Sprite.pool()].reclaimed, 0);
        assert_eq!(snap.pools[Sprite.pool()].free, 0b11);
    }

    #[test]
    fn get_any_plane_prefers_reclaimed() {
        let (mut pm, _driver) = manager(Platform::Generic(GenericPlatform::dual_pipe()));
        let a = pm.get_any_plane(Sprite).unwrap().key();
        let b = pm.get_any_plane(Sprite).unwrap().key();
        assert_eq!((a.index, b.index), (0, 1));
        pm.reclaim_plane(b);
        assert_eq!(pm.get_any_plane(Sprite).unwrap().key(), b);
        pm.put_plane(a);
        assert_eq!(pm.get_any_plane(Sprite).unwrap().key(), a);
        assert_eq!(pm.get_any_plane(Sprite).unwrap().index(), 2);
        assert!(pm.get_any_plane(Sprite).is_none());
    }

    #[test]
    fn overlays_disabled_query() {
        let (mut pm, _driver) = manager(Platform::Generic(GenericPlatform::single_pipe()));
        assert!(pm.is_overlay_planes_disabled());
        let mut cfg = config(&[Primary, Overlay]);
        pm.assign_planes(DisplayId::PRIMARY, &mut cfg).unwrap();
        assert!(!pm.is_overlay_planes_disabled());
    }
}
