//! Per device cache of installed kernels keyed by artifact identity.
//!
//! Install-or-get is one map operation, so under the runtime lock two
//! concurrent installs of the same new identity cannot both build, at most
//! one built program wins and every caller observes the same installed
//! kernel. Compilation is assumed referentially identical per identity,
//! a hit ignores the supplied binary.

use std::collections::BTreeMap;

use crate::artifact::{KernelArtifact, KernelMeta};
use crate::backend::{Device, ProgramId};
use crate::error::VortexError;

/// Launch-ready kernel installed on one device
#[derive(Debug, Clone)]
pub struct InstalledKernel {
    pub(crate) program: ProgramId,
    identity: Box<str>,
    meta: KernelMeta,
}

impl InstalledKernel {
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub const fn meta(&self) -> &KernelMeta {
        &self.meta
    }

    #[must_use]
    pub const fn program(&self) -> ProgramId {
        self.program
    }
}

#[derive(Debug)]
pub(crate) struct CodeCache {
    programs: BTreeMap<Box<str>, InstalledKernel>,
    builds: usize,
}

impl CodeCache {
    pub(crate) const fn new() -> CodeCache {
        CodeCache { programs: BTreeMap::new(), builds: 0 }
    }

    /// Returns the cached kernel for the artifact identity, building and
    /// inserting it on a miss. A failed build is fatal for this call and
    /// inserts nothing, a later install with the same identity builds again.
    pub(crate) fn install_or_get(
        &mut self,
        device: &mut Device,
        artifact: &KernelArtifact,
        debug_asm: bool,
    ) -> Result<InstalledKernel, VortexError> {
        if let Some(kernel) = self.programs.get(artifact.identity.as_ref()) {
            return Ok(kernel.clone());
        }
        self.builds += 1;
        let program =
            device.build(artifact, debug_asm).map_err(VortexError::KernelBuildFailure)?;
        let kernel = InstalledKernel {
            program,
            identity: artifact.identity.clone(),
            meta: artifact.meta.clone(),
        };
        self.programs.insert(artifact.identity.clone(), kernel.clone());
        Ok(kernel)
    }

    pub(crate) fn is_cached(&self, identity: &str) -> bool {
        self.programs.contains_key(identity)
    }

    /// Clears the mapping only. Programs already handed out stay valid on
    /// the device until it deinitializes, new lookups build again.
    pub(crate) fn reset(&mut self) {
        self.programs.clear();
    }

    /// Number of build attempts so far
    pub(crate) const fn build_count(&self) -> usize {
        self.builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::KernelMeta;
    use crate::backend::virt::{self, VirtConfig};

    fn virt_device() -> Device {
        let mut devices = Vec::new();
        virt::initialize_devices(
            &VirtConfig { enabled: true, ..Default::default() },
            &mut devices,
            false,
        )
        .unwrap();
        devices.pop().unwrap()
    }

    fn artifact(identity: &str, source: &str) -> KernelArtifact {
        KernelArtifact::new(identity, source.as_bytes().to_vec(), "main", KernelMeta::default())
    }

    #[test]
    fn install_is_idempotent_per_identity() {
        let mut device = virt_device();
        let mut cache = CodeCache::new();
        let a = artifact("add", "ld.f32 r0, g0\nst.f32 g1, r0");
        let first = cache.install_or_get(&mut device, &a, false).unwrap();
        // Second install with a different binary returns the first kernel unchanged
        let b = artifact("add", "this binary is never even parsed");
        let second = cache.install_or_get(&mut device, &b, false).unwrap();
        assert_eq!(first.program(), second.program());
        assert_eq!(cache.build_count(), 1);
        assert!(cache.is_cached("add"));
        assert!(!cache.is_cached("sub"));
    }

    #[test]
    fn failed_build_is_not_inserted() {
        let mut device = virt_device();
        let mut cache = CodeCache::new();
        let broken = artifact("broken", "definitely not assembly");
        let err = cache.install_or_get(&mut device, &broken, false).unwrap_err();
        assert!(matches!(err, VortexError::KernelBuildFailure(_)));
        assert!(!cache.is_cached("broken"));
    }

    #[test]
    fn reset_forces_rebuild() {
        let mut device = virt_device();
        let mut cache = CodeCache::new();
        let a = artifact("add", "ld.f32 r0, g0\nst.f32 g1, r0");
        cache.install_or_get(&mut device, &a, false).unwrap();
        cache.reset();
        assert!(!cache.is_cached("add"));
        cache.install_or_get(&mut device, &a, false).unwrap();
        assert_eq!(cache.build_count(), 2);
    }
}
