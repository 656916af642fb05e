use passway::{
    BarrierError, DeviceError, ResourceCreationError, SynchronizationTimeoutError, ash::vk,
    layout::Layout,
};
use thiserror::Error;

///Errors while building, changing or recording a pass graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Pass graph contains a cycle through pass \"{pass}\"")]
    Cycle { pass: String },
    #[error("Pass \"{pass}\" reads and writes attachment \"{attachment}\"")]
    ReadWriteAlias { pass: String, attachment: String },
    #[error("Pass \"{pass}\" references an attachment that is not part of the graph")]
    UnknownAttachment { pass: String },
    #[error("No pass named \"{0}\"")]
    UnknownPass(String),
    #[error("Name \"{0}\" is used more than once")]
    DuplicateName(String),
    #[error("Pass \"{pass}\" samples \"{attachment}\" through a descriptor, but the attachment has no sampler")]
    MissingSampler { pass: String, attachment: String },
    #[error("Pass \"{pass}\" uses \"{attachment}\" in {layout:?}, which its format does not support")]
    UnsupportedLayout {
        pass: String,
        attachment: String,
        layout: Layout,
    },
    #[error("Render targets of pass \"{pass}\" differ in extent")]
    ExtentMismatch { pass: String },
    #[error("The graph renders to the backbuffer, but no swapchain image is bound")]
    BackbufferUnbound,
    #[error("Failed to record pass \"{pass}\": {source}")]
    Record {
        pass: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error(transparent)]
    ResourceCreation(#[from] ResourceCreationError),
}

///Errors of the per-frame loop.
#[derive(Error, Debug)]
pub enum FrameError {
    ///The swapchain no longer matches the surface. Call `FrameOrchestrator::handle_resize`.
    #[error("Swapchain is out of date and must be recreated")]
    SurfaceOutOfDate,
    #[error(transparent)]
    Timeout(#[from] SynchronizationTimeoutError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("{op} failed: {result}")]
    Vk {
        op: &'static str,
        #[source]
        result: vk::Result,
    },
}

impl From<BarrierError> for FrameError {
    fn from(e: BarrierError) -> Self {
        FrameError::Graph(GraphError::Barrier(e))
    }
}

impl From<ResourceCreationError> for FrameError {
    fn from(e: ResourceCreationError) -> Self {
        FrameError::Graph(GraphError::ResourceCreation(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(GraphError: Send, Sync);
        assert_impl_all!(FrameError: Send, Sync);
    }

    #[test]
    fn record_errors_name_the_pass() {
        let err = GraphError::Record {
            pass: "vertical blur".to_owned(),
            source: anyhow::anyhow!("pipeline missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("vertical blur"));
        assert!(msg.contains("pipeline missing"));
    }
}
