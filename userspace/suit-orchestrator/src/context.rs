// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Platform services a running manifest sequence may use
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below; end-to-end fetch in tests/suit_host

use std::sync::Arc;

use flash::{FlashDevice, Partition};
use log::{debug, info, warn};
use suit_plat::component_id::ComponentId;
use suit_plat::{authorize_component_id, ExecutionMode, Mci, MciCompatibility, MciError, PlatError};
use suit_storage::{ManifestClassId, StorageError, SuitStorage};
use suit_stream::{
    CacheSlotSink, DfuCache, FlashSink, ImageRequestor, StreamConfig, StreamError, StreamSink,
};

use crate::processor::ProcessorError;

/// Services offered to [`crate::ManifestProcessor::process`].
pub trait SequenceContext {
    fn mode(&self) -> ExecutionMode;

    /// Class of the manifest being processed.
    fn class_id(&self) -> ManifestClassId;

    /// Checks that the current manifest may use `component_id`.
    fn authorize(&self, component_id: &[u8]) -> Result<(), ProcessorError>;

    /// Checks that the current manifest may process the manifest `child` as a dependency
    /// in the current execution mode.
    fn authorize_process_dependency(&self, child: &ManifestClassId) -> Result<(), ProcessorError>;

    /// Streams `resource_id` into `component_id`, a memory component or a cache pool keyed
    /// by the resource id; returns bytes written.
    fn fetch(&mut self, resource_id: &[u8], component_id: &[u8]) -> Result<usize, ProcessorError>;

    /// Reads the payload a cache pool holds for `uri`.
    fn cache_read(&self, uri: &[u8]) -> Result<Vec<u8>, ProcessorError>;

    /// Reads the current contents of a component.
    fn read_component(&self, component_id: &[u8]) -> Result<Vec<u8>, ProcessorError>;

    fn var_get(&self, index: usize) -> Result<u32, ProcessorError>;

    fn var_set(&mut self, index: usize, value: u32) -> Result<(), ProcessorError>;
}

/// Streaming requestor plus the timings used for `fetch`.
pub struct Streaming {
    pub requestor: Arc<ImageRequestor>,
    pub config: StreamConfig,
}

pub(crate) struct PlatformContext<'a, F: FlashDevice> {
    pub storage: &'a mut SuitStorage<F>,
    pub mci: &'a Mci,
    pub mode: ExecutionMode,
    pub class_id: ManifestClassId,
    pub streaming: Option<&'a Streaming>,
    pub memory: Option<&'a mut Box<dyn FlashDevice + Send>>,
    /// Cache pools on the `memory` device.
    pub cache: Option<&'a DfuCache>,
}

impl<F: FlashDevice> PlatformContext<'_, F> {
    fn manifest_component_id(&self) -> Result<Vec<u8>, ProcessorError> {
        ComponentId::InstalledManifest(self.class_id)
            .encode()
            .map_err(|_| ProcessorError::Component(PlatError::Decoding))
    }

    fn fetch_to_memory(
        &mut self,
        resource_id: &[u8],
        address: u64,
        size: u64,
    ) -> Result<usize, ProcessorError> {
        let streaming = self.streaming.ok_or(ProcessorError::Unsupported)?;
        let memory = self.memory.as_deref_mut().ok_or(ProcessorError::Unsupported)?;

        let address = usize::try_from(address).map_err(|_| PlatError::UnsupportedComponentId)?;
        let size = usize::try_from(size).map_err(|_| PlatError::UnsupportedComponentId)?;
        let device: &mut (dyn FlashDevice + Send) = &mut **memory;
        let mut sink = FlashSink::open(device, Partition::new("mem_component", address, size))
            .map_err(StreamError::from)?;
        streaming.requestor.stream(
            resource_id,
            &mut sink,
            streaming.config.inter_chunk_timeout,
            streaming.config.requesting_period,
        )?;
        let written = sink.used_storage();
        info!("orchestrator: fetched {} bytes into {:#x}", written, address);
        Ok(written)
    }

    fn fetch_to_cache(&mut self, resource_id: &[u8], pool: u32) -> Result<usize, ProcessorError> {
        let streaming = self.streaming.ok_or(ProcessorError::Unsupported)?;
        let cache = self.cache.ok_or(ProcessorError::Unsupported)?;
        let memory = self.memory.as_deref_mut().ok_or(ProcessorError::Unsupported)?;
        let pool = u8::try_from(pool).map_err(|_| PlatError::UnsupportedComponentId)?;
        let device: &mut (dyn FlashDevice + Send) = &mut **memory;

        let slot = cache.slot_create(device, pool, resource_id)?;
        let mut sink = CacheSlotSink::new(&mut *device, slot);
        let streamed = streaming.requestor.stream(
            resource_id,
            &mut sink,
            streaming.config.inter_chunk_timeout,
            streaming.config.requesting_period,
        );
        let written = sink.used_storage();
        match streamed {
            Ok(()) => {
                cache.slot_close(device, &slot, written)?;
                info!("orchestrator: cached {} bytes in pool {}", written, pool);
                Ok(written)
            }
            Err(err) => {
                if let Err(drop_err) = cache.slot_drop(device, &slot) {
                    warn!("orchestrator: cache slot in pool {} not dropped: {}", pool, drop_err);
                }
                Err(err.into())
            }
        }
    }
}

impl<F: FlashDevice> SequenceContext for PlatformContext<'_, F> {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn class_id(&self) -> ManifestClassId {
        self.class_id
    }

    fn authorize(&self, component_id: &[u8]) -> Result<(), ProcessorError> {
        let manifest = self.manifest_component_id()?;
        let compatibility = MciCompatibility::new(self.mci, self.mode);
        authorize_component_id(Some(&manifest), Some(component_id), &compatibility)?;
        Ok(())
    }

    fn authorize_process_dependency(&self, child: &ManifestClassId) -> Result<(), ProcessorError> {
        self.mci.validate_process_dependency(self.mode, &self.class_id, child).map_err(|err| {
            warn!(
                "orchestrator: {} may not process {} in {:?}: {}",
                self.class_id, child, self.mode, err
            );
            match err {
                MciError::ManifestClassId => PlatError::UnsupportedComponentId,
                _ => PlatError::UnauthorizedComponent,
            }
        })?;
        Ok(())
    }

    fn fetch(&mut self, resource_id: &[u8], component_id: &[u8]) -> Result<usize, ProcessorError> {
        self.authorize(component_id)?;
        match ComponentId::decode(component_id).map_err(|_| PlatError::Decoding)? {
            ComponentId::Mem { address, size, .. } => {
                self.fetch_to_memory(resource_id, address, size)
            }
            ComponentId::CachePool(pool) => self.fetch_to_cache(resource_id, pool),
            _ => Err(ProcessorError::Unsupported),
        }
    }

    fn cache_read(&self, uri: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        let cache = self.cache.ok_or(ProcessorError::Unsupported)?;
        let memory = self.memory.as_deref().ok_or(ProcessorError::Unsupported)?;
        Ok(cache.read(&**memory, uri)?)
    }

    fn read_component(&self, component_id: &[u8]) -> Result<Vec<u8>, ProcessorError> {
        self.authorize(component_id)?;
        let id = ComponentId::decode(component_id).map_err(|_| PlatError::Decoding)?;
        debug!("orchestrator: read {:?}", id.component_type());
        match id {
            ComponentId::Mem { address, size, .. } => {
                let memory = self.memory.as_deref().ok_or(ProcessorError::Unsupported)?;
                let address =
                    usize::try_from(address).map_err(|_| PlatError::UnsupportedComponentId)?;
                let size = usize::try_from(size).map_err(|_| PlatError::UnsupportedComponentId)?;
                Ok(flash::read_vec(&**memory, address, size).map_err(StorageError::from)?)
            }
            ComponentId::CandidateImage(index) => {
                // Region 0 of the candidate is the envelope; images follow.
                let regions = self.storage.update_candidate_get()?;
                let region = regions
                    .get(index as usize + 1)
                    .filter(|region| !region.is_unset())
                    .ok_or(StorageError::NotFound)?;
                Ok(self.storage.read_raw(region.address, region.size)?)
            }
            ComponentId::InstalledManifest(class_id) => {
                Ok(self.storage.installed_envelope_read(&class_id)?)
            }
            ComponentId::ManifestVariable(index) => {
                Ok(self.storage.var_get(index as usize)?.to_le_bytes().to_vec())
            }
            _ => Err(ProcessorError::Unsupported),
        }
    }

    fn var_get(&self, index: usize) -> Result<u32, ProcessorError> {
        Ok(self.storage.var_get(index)?)
    }

    fn var_set(&mut self, index: usize, value: u32) -> Result<(), ProcessorError> {
        Ok(self.storage.var_set(index, value)?)
    }
}
