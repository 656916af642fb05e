//! # Null device
//!
//! A [GpuDevice] that never touches a GPU. Every created object gets a unique synthetic handle and is tracked
//! until it is destroyed. This allows building and executing pass graphs as a dry run, for instance to
//! validate a graph's barriers during development, and to inspect which objects are alive afterwards.

use std::sync::Mutex;

use ahash::AHashSet;
use ash::vk::{self, Handle};

use crate::{
    device::{GpuDevice, ImageInfo, SampledImageWrite, SamplerInfo},
    error::ResourceCreationError,
};

///Memory handed out by the [NullDevice].
#[derive(Debug, PartialEq, Eq)]
pub struct NullMemory {
    pub id: u64,
    pub size: u64,
}

///Object lifetime events, in the order they happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NullEvent {
    CreateImage { name: String, image: vk::Image },
    CreateView { name: String, view: vk::ImageView },
    CreateSampler { name: String, sampler: vk::Sampler },
    DestroyView(vk::ImageView),
    DestroyImage(vk::Image),
    FreeMemory(u64),
    DestroySampler(vk::Sampler),
    WaitIdle,
}

#[derive(Default)]
struct NullState {
    next_handle: u64,
    images: AHashSet<u64>,
    views: AHashSet<u64>,
    samplers: AHashSet<u64>,
    memory: AHashSet<u64>,
    events: Vec<NullEvent>,
    writes: Vec<SampledImageWrite>,
    rejected_formats: Vec<vk::Format>,
}

impl NullState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Default)]
pub struct NullDevice {
    state: Mutex<NullState>,
}

impl NullDevice {
    pub fn new() -> Self {
        NullDevice {
            state: Mutex::new(NullState::default()),
        }
    }

    ///Marks `format` as unsupported. Creating images with that format fails afterwards.
    pub fn reject_format(&self, format: vk::Format) {
        self.with_state(|s| s.rejected_formats.push(format));
    }

    pub fn live_images(&self) -> usize {
        self.with_state(|s| s.images.len())
    }

    pub fn live_views(&self) -> usize {
        self.with_state(|s| s.views.len())
    }

    pub fn live_memory(&self) -> usize {
        self.with_state(|s| s.memory.len())
    }

    pub fn live_samplers(&self) -> usize {
        self.with_state(|s| s.samplers.len())
    }

    pub fn is_live_image(&self, image: vk::Image) -> bool {
        self.with_state(|s| s.images.contains(&image.as_raw()))
    }

    pub fn is_live_view(&self, view: vk::ImageView) -> bool {
        self.with_state(|s| s.views.contains(&view.as_raw()))
    }

    ///All lifetime events so far.
    pub fn events(&self) -> Vec<NullEvent> {
        self.with_state(|s| s.events.clone())
    }

    ///All descriptor writes so far.
    pub fn descriptor_writes(&self) -> Vec<SampledImageWrite> {
        self.with_state(|s| s.writes.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut NullState) -> T) -> T {
        //A poisoned lock only means another test thread panicked, the bookkeeping is still usable.
        let mut lock = match self.state.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut lock)
    }
}

impl GpuDevice for NullDevice {
    type Memory = NullMemory;

    fn supports_format(&self, format: vk::Format, _features: vk::FormatFeatureFlags) -> bool {
        self.with_state(|s| !s.rejected_formats.contains(&format))
    }

    fn create_image(
        &self,
        name: &str,
        info: &ImageInfo,
    ) -> Result<(vk::Image, NullMemory), ResourceCreationError> {
        if !self.supports_format(info.format, info.required_features()) {
            return Err(ResourceCreationError::UnsupportedFormat {
                name: name.to_owned(),
                format: info.format,
                features: info.required_features(),
            });
        }

        Ok(self.with_state(|s| {
            let image = vk::Image::from_raw(s.next());
            let memory = s.next();
            s.images.insert(image.as_raw());
            s.memory.insert(memory);
            s.events.push(NullEvent::CreateImage {
                name: name.to_owned(),
                image,
            });
            (
                image,
                NullMemory {
                    id: memory,
                    //assume 4 bytes per texel, only used for bookkeeping.
                    size: info.extent.width as u64 * info.extent.height as u64 * 4,
                },
            )
        }))
    }

    fn create_image_view(
        &self,
        name: &str,
        image: vk::Image,
        _info: &ImageInfo,
    ) -> Result<vk::ImageView, ResourceCreationError> {
        self.with_state(|s| {
            if !s.images.contains(&image.as_raw()) {
                return Err(ResourceCreationError::Vk {
                    name: name.to_owned(),
                    object: "image view",
                    result: vk::Result::ERROR_UNKNOWN,
                });
            }
            let view = vk::ImageView::from_raw(s.next());
            s.views.insert(view.as_raw());
            s.events.push(NullEvent::CreateView {
                name: name.to_owned(),
                view,
            });
            Ok(view)
        })
    }

    fn create_sampler(
        &self,
        name: &str,
        _info: &SamplerInfo,
    ) -> Result<vk::Sampler, ResourceCreationError> {
        Ok(self.with_state(|s| {
            let sampler = vk::Sampler::from_raw(s.next());
            s.samplers.insert(sampler.as_raw());
            s.events.push(NullEvent::CreateSampler {
                name: name.to_owned(),
                sampler,
            });
            sampler
        }))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.with_state(|s| {
            s.views.remove(&view.as_raw());
            s.events.push(NullEvent::DestroyView(view));
        })
    }

    fn destroy_image(&self, image: vk::Image) {
        self.with_state(|s| {
            s.images.remove(&image.as_raw());
            s.events.push(NullEvent::DestroyImage(image));
        })
    }

    fn free_memory(&self, memory: NullMemory) {
        self.with_state(|s| {
            s.memory.remove(&memory.id);
            s.events.push(NullEvent::FreeMemory(memory.id));
        })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.with_state(|s| {
            s.samplers.remove(&sampler.as_raw());
            s.events.push(NullEvent::DestroySampler(sampler));
        })
    }

    fn write_sampled_images(&self, writes: &[SampledImageWrite]) {
        self.with_state(|s| s.writes.extend_from_slice(writes))
    }

    fn wait_idle(&self) -> Result<(), vk::Result> {
        self.with_state(|s| s.events.push(NullEvent::WaitIdle));
        Ok(())
    }
}
