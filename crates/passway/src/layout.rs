//! # Layouts
//!
//! Every attachment is always in exactly one [Layout]. Each layout implies the access mask and pipeline
//! stages the image is used with while in that layout. A barrier between two layouts is therefore fully
//! described by the pair of layouts and the image's aspect. [transition_scopes] computes that pair, or
//! refuses if the transition is meaningless (for instance moving a depth image into `ColorAttachment`).

use ash::vk;

///The access states an attachment can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

///Access mask and pipeline stages an image is used with in one [Layout].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessScope {
    pub access: vk::AccessFlags2,
    pub stages: vk::PipelineStageFlags2,
}

impl AccessScope {
    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::SHADER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    ///Only writes have to be made available, reads in the source scope just need the execution dependency.
    pub fn as_source(self) -> Self {
        AccessScope {
            access: self.access & Self::WRITE_ACCESS,
            stages: self.stages,
        }
    }
}

impl Layout {
    pub const ALL: [Layout; 7] = [
        Layout::Undefined,
        Layout::ColorAttachment,
        Layout::DepthStencilAttachment,
        Layout::ShaderReadOnly,
        Layout::TransferSrc,
        Layout::TransferDst,
        Layout::Present,
    ];

    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            Layout::Undefined => vk::ImageLayout::UNDEFINED,
            Layout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Layout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Layout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Layout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Layout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Layout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub fn from_vk(layout: vk::ImageLayout) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.to_vk() == layout)
    }

    ///The access and stages work in this layout is done with.
    pub fn scope(self) -> AccessScope {
        let (access, stages) = match self {
            Layout::Undefined => (vk::AccessFlags2::NONE, vk::PipelineStageFlags2::TOP_OF_PIPE),
            Layout::ColorAttachment => (
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ),
            Layout::DepthStencilAttachment => (
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            ),
            Layout::ShaderReadOnly => (
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
            ),
            Layout::TransferSrc => (
                vk::AccessFlags2::TRANSFER_READ,
                vk::PipelineStageFlags2::TRANSFER,
            ),
            Layout::TransferDst => (
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::PipelineStageFlags2::TRANSFER,
            ),
            Layout::Present => (
                vk::AccessFlags2::NONE,
                vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            ),
        };

        AccessScope { access, stages }
    }

    ///True if an image with the given aspect can be used in this layout at all.
    pub fn supports_aspect(self, aspect: vk::ImageAspectFlags) -> bool {
        let is_depth = aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        match self {
            Layout::ColorAttachment | Layout::Present => !is_depth,
            Layout::DepthStencilAttachment => is_depth,
            _ => true,
        }
    }
}

///Returns `(source, destination)` scopes for a barrier moving an image with `aspect` from `from` to `to`.
///
/// Returns `None` if no such transition exists. That is the case for transitions *into* `Undefined` and
/// for layouts that can't hold the image's aspect.
pub fn transition_scopes(
    from: Layout,
    to: Layout,
    aspect: vk::ImageAspectFlags,
) -> Option<(AccessScope, AccessScope)> {
    if to == Layout::Undefined || !to.supports_aspect(aspect) || !from.supports_aspect(aspect) {
        return None;
    }

    Some((from.scope().as_source(), to.scope()))
}

///Picks the aspect mask for a format. Depth formats with stencil get the combined mask.
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}
