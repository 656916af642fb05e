//! # Device seam
//!
//! Everything the pass graph needs from a device is collected in [GpuDevice]. The Vulkan implementation
//! lives on [RenderContext](crate::context::RenderContext), [NullDevice](crate::null_device::NullDevice)
//! hands out synthetic handles for dry runs.

use ash::vk;

use crate::{error::ResourceCreationError, layout::format_aspect};

///Static parameters of a 2d single-mip image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
}

impl ImageInfo {
    pub fn new(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        ImageInfo {
            format,
            extent,
            usage,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }

    ///Returns a sub resource range that encloses the whole image.
    pub fn subresource_all(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    ///Subresource layers of the first (and only) mip level.
    pub fn subresource_layers_all(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect(),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    pub fn extent_3d(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.extent.width,
            height: self.extent.height,
            depth: 1,
        }
    }

    ///Format features the image's usage requires for optimal tiling.
    pub fn required_features(&self) -> vk::FormatFeatureFlags {
        let mut features = vk::FormatFeatureFlags::empty();
        if self.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            features |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        }
        if self
            .usage
            .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            features |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.usage.contains(vk::ImageUsageFlags::SAMPLED) {
            features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
        }
        if self.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            features |= vk::FormatFeatureFlags::TRANSFER_SRC;
        }
        if self.usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            features |= vk::FormatFeatureFlags::TRANSFER_DST;
        }
        features
    }
}

///Sampler parameters. The default is a clamped linear sampler, which is what offscreen targets are read with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerInfo {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub border_color: vk::BorderColor,
    pub max_lod: f32,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            max_lod: 1.0,
        }
    }
}

impl SamplerInfo {
    pub fn nearest() -> Self {
        SamplerInfo {
            filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Default::default()
        }
    }

    pub fn as_create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .mip_lod_bias(0.0)
            .max_anisotropy(1.0)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(self.max_lod)
            .border_color(self.border_color)
    }
}

///One combined-image-sampler descriptor write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampledImageWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

///Narrow device interface used by attachments and pass graphs.
///
/// Allocation calls are synchronous and fail loudly. Destruction calls can't fail.
pub trait GpuDevice: Send + Sync + 'static {
    ///Backing memory of one image.
    type Memory: Send + Sync + 'static;

    ///Returns true if `format` supports all `features` with optimal tiling.
    fn supports_format(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool;

    ///Creates the image and binds freshly allocated memory to it. The image starts in `UNDEFINED` layout.
    fn create_image(
        &self,
        name: &str,
        info: &ImageInfo,
    ) -> Result<(vk::Image, Self::Memory), ResourceCreationError>;

    ///Creates a view that encloses the whole image.
    fn create_image_view(
        &self,
        name: &str,
        image: vk::Image,
        info: &ImageInfo,
    ) -> Result<vk::ImageView, ResourceCreationError>;

    fn create_sampler(
        &self,
        name: &str,
        info: &SamplerInfo,
    ) -> Result<vk::Sampler, ResourceCreationError>;

    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_image(&self, image: vk::Image);
    fn free_memory(&self, memory: Self::Memory);
    fn destroy_sampler(&self, sampler: vk::Sampler);

    ///Updates combined image sampler descriptors.
    fn write_sampled_images(&self, writes: &[SampledImageWrite]);

    ///Blocks until all work on the device has finished.
    fn wait_idle(&self) -> Result<(), vk::Result>;
}
