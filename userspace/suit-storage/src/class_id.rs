// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Manifest class identifiers, roles and built-in secure-domain classes
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below

use core::fmt;

/// 16-byte RFC4122-derived identifier naming a manifest slot. Equality is byte-exact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestClassId([u8; 16]);

impl ManifestClassId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ManifestClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ManifestClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestClassId({self})")
    }
}

/// Domain that owns a manifest role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManifestDomain {
    Secure,
    Radio,
    Application,
}

/// Role a manifest class plays on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ManifestRole {
    SecTop = 0x10,
    SecSdfw = 0x11,
    SecSysctrl = 0x12,
    RadRecovery = 0x20,
    RadLocal1 = 0x21,
    RadLocal2 = 0x22,
    AppRoot = 0x30,
    AppRecovery = 0x31,
    AppLocal1 = 0x32,
    AppLocal2 = 0x33,
    AppLocal3 = 0x34,
}

impl ManifestRole {
    pub const ALL: [ManifestRole; 11] = [
        ManifestRole::SecTop,
        ManifestRole::SecSdfw,
        ManifestRole::SecSysctrl,
        ManifestRole::RadRecovery,
        ManifestRole::RadLocal1,
        ManifestRole::RadLocal2,
        ManifestRole::AppRoot,
        ManifestRole::AppRecovery,
        ManifestRole::AppLocal1,
        ManifestRole::AppLocal2,
        ManifestRole::AppLocal3,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| *role as u8 == value)
    }

    pub fn domain(self) -> ManifestDomain {
        match self {
            Self::SecTop | Self::SecSdfw | Self::SecSysctrl => ManifestDomain::Secure,
            Self::RadRecovery | Self::RadLocal1 | Self::RadLocal2 => ManifestDomain::Radio,
            Self::AppRoot
            | Self::AppRecovery
            | Self::AppLocal1
            | Self::AppLocal2
            | Self::AppLocal3 => ManifestDomain::Application,
        }
    }

    pub fn is_recovery(self) -> bool {
        matches!(self, Self::AppRecovery | Self::RadRecovery)
    }

    pub fn is_app_local(self) -> bool {
        matches!(self, Self::AppLocal1 | Self::AppLocal2 | Self::AppLocal3)
    }

    pub fn is_rad_local(self) -> bool {
        matches!(self, Self::RadLocal1 | Self::RadLocal2)
    }
}

/// RFC4122 uuid5(NAMESPACE_DNS, "nordicsemi.com").
pub const NORDIC_VENDOR_ID: [u8; 16] = [
    0x76, 0x17, 0xda, 0xa5, 0x71, 0xfd, 0x5a, 0x85, 0x8f, 0x94, 0xe2, 0x8d, 0x73, 0x5c, 0xe9, 0xf4,
];

/// uuid5(nordic_vid, "nRF54H20_nordic_top")
pub const NORDIC_TOP_CLASS_ID: ManifestClassId = ManifestClassId::new([
    0xf0, 0x3d, 0x38, 0x5e, 0xa7, 0x31, 0x56, 0x05, 0xb1, 0x5d, 0x03, 0x7f, 0x6d, 0xa6, 0x09, 0x7f,
]);

/// uuid5(nordic_vid, "nRF54H20_sec")
pub const NORDIC_SDFW_CLASS_ID: ManifestClassId = ManifestClassId::new([
    0xd9, 0x6b, 0x40, 0xb7, 0x09, 0x2b, 0x5c, 0xd1, 0xa5, 0x9f, 0x9a, 0xf8, 0x0c, 0x33, 0x7e, 0xba,
]);

/// uuid5(nordic_vid, "nRF54H20_sys")
pub const NORDIC_SYSCTRL_CLASS_ID: ManifestClassId = ManifestClassId::new([
    0xc0, 0x8a, 0x25, 0xd7, 0x35, 0xe6, 0x59, 0x2c, 0xb7, 0xad, 0x43, 0xac, 0xc8, 0xd1, 0xd1, 0xc8,
]);
