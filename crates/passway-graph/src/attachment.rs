//! # Attachments
//!
//! An [Attachment] is one 2d image the graph renders to or samples from. It owns image, view, memory and an
//! optional sampler, or wraps an imported image (the swapchain image of the current frame) without owning it.
//!
//! Each attachment tracks the [Layout] it is currently in. Moving it to another layout goes through
//! [Attachment::transition_to], which records the matching barrier.

use std::sync::Arc;

use passway::{
    BarrierError, ResourceCreationError,
    ash::vk,
    device::{GpuDevice, ImageInfo, SamplerInfo},
    layout::{Layout, transition_scopes},
};
use passway_commands::BarrierBuilder;

///How an attachment is sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentSize {
    ///Follows the swapchain extent. Recreated on resize.
    Swapchain,
    ///Fixed extent, untouched by resizes.
    Fixed(vk::Extent2D),
}

impl AttachmentSize {
    pub fn fixed(width: u32, height: u32) -> Self {
        AttachmentSize::Fixed(vk::Extent2D { width, height })
    }

    pub fn resolve(&self, swapchain_extent: vk::Extent2D) -> vk::Extent2D {
        match self {
            AttachmentSize::Swapchain => swapchain_extent,
            AttachmentSize::Fixed(extent) => *extent,
        }
    }

    pub fn follows_swapchain(&self) -> bool {
        matches!(self, AttachmentSize::Swapchain)
    }
}

///Declaration of an attachment, before it is created by the graph.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentInfo {
    pub name: String,
    pub format: vk::Format,
    pub size: AttachmentSize,
    pub usage: vk::ImageUsageFlags,
    pub sampler: Option<SamplerInfo>,
    ///Layout the attachment is moved into once after creation. See `PassGraph::initialize`.
    pub initial_layout: Option<Layout>,
}

impl AttachmentInfo {
    ///Render target that is sampled afterwards.
    pub fn color(name: impl Into<String>, format: vk::Format, size: AttachmentSize) -> Self {
        AttachmentInfo {
            name: name.into(),
            format,
            size,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            sampler: None,
            initial_layout: None,
        }
    }

    pub fn depth(name: impl Into<String>, format: vk::Format, size: AttachmentSize) -> Self {
        AttachmentInfo {
            name: name.into(),
            format,
            size,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sampler: None,
            initial_layout: None,
        }
    }

    ///Blit target that is sampled by later passes. Starts in `ShaderReadOnly` with a linear sampler.
    pub fn texture(name: impl Into<String>, format: vk::Format, size: AttachmentSize) -> Self {
        AttachmentInfo {
            name: name.into(),
            format,
            size,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            sampler: Some(SamplerInfo::default()),
            initial_layout: Some(Layout::ShaderReadOnly),
        }
    }

    pub fn add_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerInfo) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_initial_layout(mut self, layout: Layout) -> Self {
        self.initial_layout = Some(layout);
        self
    }

    pub fn image_info(&self, swapchain_extent: vk::Extent2D) -> ImageInfo {
        ImageInfo::new(self.format, self.size.resolve(swapchain_extent), self.usage)
    }
}

enum Ownership<M> {
    Owned {
        image: vk::Image,
        view: vk::ImageView,
        memory: Option<M>,
        sampler: Option<vk::Sampler>,
    },
    Imported {
        image: vk::Image,
        view: vk::ImageView,
    },
    Released,
}

pub struct Attachment<D: GpuDevice> {
    device: Arc<D>,
    name: String,
    info: ImageInfo,
    aspect: vk::ImageAspectFlags,
    ownership: Ownership<D::Memory>,
    current_layout: Layout,
}

impl<D: GpuDevice> Attachment<D> {
    ///Allocates image, memory and view. The attachment starts in `Undefined`.
    pub fn create(
        device: &Arc<D>,
        name: impl Into<String>,
        info: &ImageInfo,
    ) -> Result<Self, ResourceCreationError> {
        let name = name.into();
        if info.extent.width == 0 || info.extent.height == 0 {
            return Err(ResourceCreationError::ZeroExtent {
                name,
                extent: info.extent,
            });
        }

        let (image, memory) = device.create_image(&name, info)?;
        let view = match device.create_image_view(&name, image, info) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image);
                device.free_memory(memory);
                return Err(e);
            }
        };

        #[cfg(feature = "logging")]
        log::trace!(
            "Created attachment \"{}\" {:?} {}x{}",
            name,
            info.format,
            info.extent.width,
            info.extent.height
        );

        Ok(Attachment {
            device: device.clone(),
            name,
            info: *info,
            aspect: info.aspect(),
            ownership: Ownership::Owned {
                image,
                view,
                memory: Some(memory),
                sampler: None,
            },
            current_layout: Layout::Undefined,
        })
    }

    ///Creates a sampler that is destroyed together with the attachment. Fails if the attachment is imported.
    pub fn with_sampler(mut self, info: &SamplerInfo) -> Result<Self, ResourceCreationError> {
        let new_sampler = self.device.create_sampler(&self.name, info)?;
        match &mut self.ownership {
            Ownership::Owned { sampler, .. } => {
                if let Some(old) = sampler.replace(new_sampler) {
                    self.device.destroy_sampler(old);
                }
                Ok(self)
            }
            _ => {
                self.device.destroy_sampler(new_sampler);
                Err(ResourceCreationError::Vk {
                    name: self.name.clone(),
                    object: "sampler",
                    result: vk::Result::ERROR_FEATURE_NOT_PRESENT,
                })
            }
        }
    }

    ///Wraps an image owned by someone else, for instance a swapchain image. The image and view are never destroyed
    /// by the attachment. Starts in `Undefined`.
    pub fn imported(
        device: &Arc<D>,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        info: &ImageInfo,
    ) -> Self {
        Attachment {
            device: device.clone(),
            name: name.into(),
            info: *info,
            aspect: info.aspect(),
            ownership: Ownership::Imported { image, view },
            current_layout: Layout::Undefined,
        }
    }

    ///Records a barrier into `barriers` that moves the attachment into `new_layout`. Returns `false` without
    /// recording anything if the attachment already is in that layout.
    pub fn transition_to(
        &mut self,
        barriers: &mut BarrierBuilder,
        new_layout: Layout,
    ) -> Result<bool, BarrierError> {
        if self.is_released() {
            return Err(BarrierError::Destroyed {
                attachment: self.name.clone(),
                to: new_layout,
            });
        }
        if self.current_layout == new_layout {
            return Ok(false);
        }

        let (src, dst) = transition_scopes(self.current_layout, new_layout, self.aspect).ok_or_else(
            || BarrierError::NoMapping {
                attachment: self.name.clone(),
                from: self.current_layout,
                to: new_layout,
            },
        )?;

        barriers.image_barrier(
            self.image(),
            self.info.subresource_all(),
            src,
            self.current_layout,
            dst,
            new_layout,
        );
        self.current_layout = new_layout;
        Ok(true)
    }

    ///Overwrites the tracked layout without recording a barrier. Used when a recorded command buffer, that moves
    /// the attachment, is replayed.
    pub(crate) fn assume_layout(&mut self, layout: Layout) {
        self.current_layout = layout;
    }

    ///Releases view, image, memory and sampler, in that order. Imported attachments only forget their handles.
    /// Calling this more than once is a no-op.
    pub fn destroy(&mut self) {
        match std::mem::replace(&mut self.ownership, Ownership::Released) {
            Ownership::Owned {
                image,
                view,
                memory,
                sampler,
            } => {
                #[cfg(feature = "logging")]
                log::trace!("Destroying attachment \"{}\"", self.name);

                self.device.destroy_image_view(view);
                self.device.destroy_image(image);
                if let Some(memory) = memory {
                    self.device.free_memory(memory);
                }
                if let Some(sampler) = sampler {
                    self.device.destroy_sampler(sampler);
                }
            }
            Ownership::Imported { .. } | Ownership::Released => {}
        }
        self.current_layout = Layout::Undefined;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.current_layout
    }

    ///The image handle. Null if the attachment was released.
    pub fn image(&self) -> vk::Image {
        match &self.ownership {
            Ownership::Owned { image, .. } | Ownership::Imported { image, .. } => *image,
            Ownership::Released => vk::Image::null(),
        }
    }

    pub fn view(&self) -> vk::ImageView {
        match &self.ownership {
            Ownership::Owned { view, .. } | Ownership::Imported { view, .. } => *view,
            Ownership::Released => vk::ImageView::null(),
        }
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        match &self.ownership {
            Ownership::Owned { sampler, .. } => *sampler,
            _ => None,
        }
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.ownership, Ownership::Imported { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self.ownership, Ownership::Released)
    }
}

impl<D: GpuDevice> Drop for Attachment<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passway::null_device::{NullDevice, NullEvent};
    use passway_commands::{CommandLog, CommandRecorder};
    use static_assertions::assert_impl_all;

    fn color_info() -> ImageInfo {
        AttachmentInfo::color(
            "color",
            vk::Format::R8G8B8A8_UNORM,
            AttachmentSize::fixed(256, 256),
        )
        .image_info(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Attachment<NullDevice>: Send, Sync);
    }

    #[test]
    fn fixed_size_ignores_swapchain() {
        assert_eq!(color_info().extent.width, 256);
        let depth = AttachmentInfo::depth(
            "depth",
            vk::Format::D32_SFLOAT,
            AttachmentSize::Swapchain,
        );
        assert_eq!(
            depth
                .image_info(vk::Extent2D {
                    width: 800,
                    height: 600
                })
                .extent
                .height,
            600
        );
    }

    #[test]
    fn transition_is_idempotent() {
        let device = Arc::new(NullDevice::new());
        let mut att = Attachment::create(&device, "color", &color_info()).unwrap();
        let mut barriers = BarrierBuilder::new();

        assert!(att.transition_to(&mut barriers, Layout::ColorAttachment).unwrap());
        assert!(!att.transition_to(&mut barriers, Layout::ColorAttachment).unwrap());
        assert_eq!(barriers.len(), 1);
        assert_eq!(att.layout(), Layout::ColorAttachment);

        let mut log = CommandLog::new();
        log.pipeline_barrier(&barriers);
        let t = log.transitions()[0];
        assert_eq!(t.from, vk::ImageLayout::UNDEFINED);
        assert_eq!(t.to, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(t.image, att.image());
    }

    #[test]
    fn invalid_transition_names_attachment() {
        let device = Arc::new(NullDevice::new());
        let mut att = Attachment::create(&device, "color", &color_info()).unwrap();
        let mut barriers = BarrierBuilder::new();

        let err = att
            .transition_to(&mut barriers, Layout::DepthStencilAttachment)
            .unwrap_err();
        assert_eq!(
            err,
            BarrierError::NoMapping {
                attachment: "color".to_owned(),
                from: Layout::Undefined,
                to: Layout::DepthStencilAttachment,
            }
        );
        assert!(!barriers.has_barrier());
        assert_eq!(att.layout(), Layout::Undefined);
    }

    #[test]
    fn depth_uses_combined_aspect() {
        let device = Arc::new(NullDevice::new());
        let info = ImageInfo::new(
            vk::Format::D24_UNORM_S8_UINT,
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        let mut att = Attachment::create(&device, "depth", &info).unwrap();
        let mut barriers = BarrierBuilder::new();
        att.transition_to(&mut barriers, Layout::DepthStencilAttachment)
            .unwrap();
        assert_eq!(
            barriers.images[0].subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn destroy_releases_in_order_once() {
        let device = Arc::new(NullDevice::new());
        let mut att = Attachment::create(&device, "tex", &color_info())
            .unwrap()
            .with_sampler(&SamplerInfo::default())
            .unwrap();
        let image = att.image();
        let view = att.view();

        att.destroy();
        att.destroy();
        drop(att);

        let destroys = device
            .events()
            .into_iter()
            .filter(|e| {
                !matches!(
                    e,
                    NullEvent::CreateImage { .. }
                        | NullEvent::CreateView { .. }
                        | NullEvent::CreateSampler { .. }
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(destroys.len(), 4);
        assert_eq!(destroys[0], NullEvent::DestroyView(view));
        assert_eq!(destroys[1], NullEvent::DestroyImage(image));
        assert!(matches!(destroys[2], NullEvent::FreeMemory(_)));
        assert!(matches!(destroys[3], NullEvent::DestroySampler(_)));
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_samplers(), 0);
    }

    #[test]
    fn released_attachment_refuses_transitions() {
        let device = Arc::new(NullDevice::new());
        let mut att = Attachment::create(&device, "color", &color_info()).unwrap();
        att.destroy();
        let mut barriers = BarrierBuilder::new();
        assert!(matches!(
            att.transition_to(&mut barriers, Layout::ColorAttachment),
            Err(BarrierError::Destroyed { .. })
        ));
    }

    #[test]
    fn imported_images_are_never_destroyed() {
        let device = Arc::new(NullDevice::new());
        let (image, memory) = device.create_image("swapchain", &color_info()).unwrap();
        let view = device.create_image_view("swapchain", image, &color_info()).unwrap();

        let att = Attachment::imported(&device, "backbuffer", image, view, &color_info());
        assert!(att.is_imported());
        drop(att);
        assert!(device.is_live_image(image));
        assert!(device.is_live_view(view));

        device.destroy_image_view(view);
        device.destroy_image(image);
        device.free_memory(memory);
    }
}
