//! # Frame orchestration
//!
//! The [FrameOrchestrator] drives one [PassGraph] through the per-frame states
//! `AcquireImage → RecordGraph → Submit → Present`.
//!
//! Each swapchain image has its own slot with a command buffer. A slot's recording is replayed as long as
//! the graph did not change and every attachment is in exactly the layout the recording started from. Otherwise
//! the graph is recorded again. The first recording of a slot usually starts from `Undefined`, so each slot
//! records once more before the layouts settle.

use std::time::Duration;

use passway::{ash::vk, layout::Layout};

use crate::{
    AttachmentKey, Executor, FrameError, GraphError, PassGraph,
    backend::{FrameBackend, PresentOutcome},
};

#[derive(Clone, Debug, PartialEq)]
pub struct FrameConfig {
    ///Upper bound for waiting on the next swapchain image.
    pub acquire_timeout: Duration,
    ///Upper bound for waiting on a slot's last submission before reusing it.
    pub fence_timeout: Duration,
    ///Replays recorded command buffers if nothing changed since they were recorded.
    pub reuse_command_buffers: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            acquire_timeout: Duration::from_secs(1),
            fence_timeout: Duration::from_secs(1),
            reuse_command_buffers: true,
        }
    }
}

impl FrameConfig {
    pub fn with(mut self, mut f: impl FnMut(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    ///Between frames.
    Idle,
    AcquireImage,
    RecordGraph,
    Submit,
    Present,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    ///Number of the frame, starting at 0.
    pub frame: u64,
    pub image_index: u32,
    ///False if a cached recording was replayed.
    pub recorded: bool,
    ///Barriers recorded during this frame. Zero when replaying.
    pub barriers: usize,
    pub present: PresentOutcome,
}

struct Recording {
    generation: u64,
    entry: Vec<(AttachmentKey, Layout)>,
    exit: Vec<(AttachmentKey, Layout)>,
}

struct FrameSlot<C> {
    commands: C,
    recording: Option<Recording>,
}

pub struct FrameOrchestrator<B: FrameBackend> {
    graph: PassGraph<B::Device>,
    slots: Vec<FrameSlot<B::Commands>>,
    executor: Executor,
    config: FrameConfig,
    state: FrameState,
    frame_count: u64,
    backend: B,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    ///Takes over `graph`. If it was built for another extent than the backend's swapchain, it is resized first.
    pub fn new(
        mut backend: B,
        mut graph: PassGraph<B::Device>,
        config: FrameConfig,
    ) -> Result<Self, FrameError> {
        if graph.extent() != backend.extent() {
            graph.resize(backend.extent())?;
        }

        let slots = (0..backend.image_count())
            .map(|_| {
                Ok(FrameSlot {
                    commands: backend.allocate_commands()?,
                    recording: None,
                })
            })
            .collect::<Result<Vec<_>, FrameError>>()?;

        Ok(FrameOrchestrator {
            graph,
            slots,
            executor: Executor::new(),
            config,
            state: FrameState::Idle,
            frame_count: 0,
            backend,
        })
    }

    pub fn graph(&self) -> &PassGraph<B::Device> {
        &self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    ///Number of frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn set_pass_enabled(&mut self, name: &str, enabled: bool) -> Result<(), GraphError> {
        self.graph.set_pass_enabled(name, enabled)
    }

    ///Payload of the named pass. Accessing it invalidates all recordings.
    pub fn payload_mut<T: std::any::Any>(&mut self, name: &str) -> Option<&mut T> {
        self.graph.payload_mut(name)
    }

    ///Renders and presents one frame.
    ///
    /// Fails with [FrameError::SurfaceOutOfDate] if the swapchain has to be recreated. In that case call
    /// [handle_resize](Self::handle_resize) before the next frame.
    pub fn render_frame(&mut self) -> Result<FrameReport, FrameError> {
        let result = self.run_frame();
        self.state = FrameState::Idle;
        result
    }

    fn run_frame(&mut self) -> Result<FrameReport, FrameError> {
        self.state = FrameState::AcquireImage;
        let image = self.backend.acquire(self.config.acquire_timeout)?;
        let slot = image.index as usize;
        if slot >= self.slots.len() {
            self.adjust_slots()?;
        }
        self.backend
            .wait_commands(&self.slots[slot].commands, self.config.fence_timeout)?;

        self.state = FrameState::RecordGraph;
        self.graph
            .bind_backbuffer(image.image, image.view, image.extent)?;

        let (recorded, barriers) = if let Some(exit) = self.reusable_recording(slot) {
            #[cfg(feature = "logging")]
            log::trace!("Replaying recording of slot {}", slot);

            self.graph.assume_layouts(&exit);
            (false, 0)
        } else {
            (true, self.record(slot)?)
        };

        self.state = FrameState::Submit;
        if let Err(e) = self.backend.submit(&mut self.slots[slot].commands, &image) {
            #[cfg(feature = "logging")]
            log::error!("Failed to submit frame {}: {}", self.frame_count, e);
            return Err(e);
        }

        self.state = FrameState::Present;
        let present = self.backend.present(&image)?;

        #[cfg(feature = "logging")]
        if present == PresentOutcome::Suboptimal || image.suboptimal {
            log::warn!("Frame {} was presented suboptimal", self.frame_count);
        }

        let report = FrameReport {
            frame: self.frame_count,
            image_index: image.index,
            recorded,
            barriers,
            present,
        };
        self.frame_count += 1;
        Ok(report)
    }

    ///Returns the exit layouts of the slot's recording if it can be replayed as is.
    fn reusable_recording(&self, slot: usize) -> Option<Vec<(AttachmentKey, Layout)>> {
        if !self.config.reuse_command_buffers || self.graph.needs_initialization() {
            return None;
        }
        let recording = self.slots[slot].recording.as_ref()?;
        if recording.generation != self.graph.generation() {
            return None;
        }

        //recorded barriers start from the entry layouts
        let compatible = recording
            .entry
            .iter()
            .all(|(key, layout)| self.graph.layout(*key) == Some(*layout));
        compatible.then(|| recording.exit.clone())
    }

    ///Records the graph into the slot's command buffer. Returns the number of barriers.
    fn record(&mut self, slot: usize) -> Result<usize, FrameError> {
        let needed_initialization = self.graph.needs_initialization();
        let entry = self.graph.layouts();
        self.slots[slot].recording = None;

        let graph = &mut self.graph;
        let executor = &mut self.executor;
        let mut barriers = 0;
        let result = self
            .backend
            .record(&mut self.slots[slot].commands, &mut |recorder| {
                if graph.needs_initialization() {
                    barriers += graph.initialize(recorder)?;
                }
                barriers += executor.execute(graph, recorder)?.barriers;
                Ok(())
            });

        if let Err(e) = result {
            //nothing of the recording reaches the GPU
            self.graph.assume_layouts(&entry);
            if needed_initialization {
                self.graph.request_initialization();
            }
            return Err(e);
        }

        self.slots[slot].recording = Some(Recording {
            generation: self.graph.generation(),
            entry,
            exit: self.graph.layouts(),
        });
        Ok(barriers)
    }

    fn adjust_slots(&mut self) -> Result<(), FrameError> {
        let count = self.backend.image_count();
        self.slots.truncate(count);
        while self.slots.len() < count {
            self.slots.push(FrameSlot {
                commands: self.backend.allocate_commands()?,
                recording: None,
            });
        }
        Ok(())
    }

    ///Recreates the swapchain and every swapchain-sized attachment for `extent`. Returns the extent actually
    /// used.
    pub fn handle_resize(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D, FrameError> {
        self.backend.wait_idle()?;
        let extent = self.backend.resize(extent)?;
        self.graph.resize(extent)?;
        for slot in &mut self.slots {
            slot.recording = None;
        }
        self.adjust_slots()?;
        self.state = FrameState::Idle;

        #[cfg(feature = "logging")]
        log::info!(
            "Resized frame orchestrator to {}x{} with {} slots",
            extent.width,
            extent.height,
            self.slots.len()
        );

        Ok(extent)
    }
}

impl<B: FrameBackend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            #[cfg(feature = "logging")]
            log::error!("Failed to wait for device idle before shutdown: {}", e);
            #[cfg(not(feature = "logging"))]
            let _ = e;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use passway::null_device::NullDevice;
    use passway_commands::{ClearValue, RecordedCommand};

    use super::*;
    use crate::{
        AttachmentInfo, AttachmentSize, GraphBuilder, LoadPolicy, PassDescriptor, PassKind,
        null_backend::NullBackend,
    };

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

    ///Offscreen pass into a swapchain-sized target, sampled by a composite into the backbuffer.
    fn orchestrator(
        device: &Arc<NullDevice>,
        image_count: usize,
        config: FrameConfig,
    ) -> FrameOrchestrator<NullBackend> {
        let backend = NullBackend::new(device, FORMAT, extent(320, 240), image_count).unwrap();
        let mut builder = GraphBuilder::new(device, extent(320, 240));
        let scene = builder.attachment(AttachmentInfo::color(
            "scene",
            vk::Format::R16G16B16A16_SFLOAT,
            AttachmentSize::Swapchain,
        ));
        let backbuffer = builder.backbuffer(FORMAT);
        builder
            .add_pass(
                PassDescriptor::render("scene", PassKind::Offscreen)
                    .write_color(scene, LoadPolicy::Clear(ClearValue::BLACK))
                    .record(|ctx| {
                        ctx.recorder.draw(3, 1, 0, 0);
                        Ok(())
                    }),
            )
            .add_pass(
                PassDescriptor::render("composite", PassKind::Composite)
                    .sample(scene, None)
                    .write_color(backbuffer, LoadPolicy::DontCare)
                    .record(|ctx| {
                        ctx.recorder.draw(3, 1, 0, 0);
                        Ok(())
                    }),
            );
        FrameOrchestrator::new(backend, builder.build().unwrap(), config).unwrap()
    }

    fn referenced_images(log: &passway_commands::CommandLog) -> Vec<vk::Image> {
        let mut images = log
            .transitions()
            .iter()
            .map(|t| t.image)
            .collect::<Vec<_>>();
        for cmd in log.commands() {
            if let RecordedCommand::BeginRendering(desc) = cmd {
                images.extend(desc.color.iter().map(|c| c.image));
                images.extend(desc.depth.iter().map(|d| d.image));
            }
        }
        images
    }

    #[test]
    fn unchanged_frames_replay_their_recording() {
        let device = Arc::new(NullDevice::new());
        let mut frames = orchestrator(&device, 1, FrameConfig::default());

        let first = frames.render_frame().unwrap();
        assert!(first.recorded);
        assert!(first.barriers > 0);
        //"scene" entered the first frame in Undefined
        assert!(frames.render_frame().unwrap().recorded);

        let third = frames.render_frame().unwrap();
        assert!(!third.recorded);
        assert_eq!(third.barriers, 0);
        assert_eq!(frames.backend().records, 2);
        assert_eq!(frames.backend().submits, 3);
        assert_eq!(frames.backend().presents, 3);
        assert_eq!(frames.frame_count(), 3);
        assert_eq!(frames.state(), FrameState::Idle);
    }

    #[test]
    fn slots_record_until_layouts_settle() {
        let device = Arc::new(NullDevice::new());
        let mut frames = orchestrator(&device, 3, FrameConfig::default());
        let recorded = (0..9)
            .map(|_| frames.render_frame().unwrap().recorded)
            .collect::<Vec<_>>();
        //only slot 0 started from the unsettled layouts
        assert_eq!(
            recorded,
            vec![true, true, true, true, false, false, false, false, false]
        );
        assert_eq!(frames.backend().records, 4);
    }

    #[test]
    fn replays_wait_on_previous_frames() {
        let device = Arc::new(NullDevice::new());
        let mut frames = orchestrator(&device, 2, FrameConfig::default());
        let (scene, _) = frames.graph().attachment_by_name("scene").unwrap();
        let scene_image = frames.graph().attachment(scene).unwrap().image();

        let mut replays = 0;
        for _ in 0..6 {
            let entry = frames.graph().layout(scene).unwrap();
            let report = frames.render_frame().unwrap();
            let log = frames.backend().last_submitted.clone().unwrap();
            let first = log
                .transitions()
                .into_iter()
                .find(|t| t.image == scene_image)
                .unwrap();
            assert_eq!(first.from, entry.to_vk());
            if !report.recorded {
                replays += 1;
                assert_ne!(first.from, vk::ImageLayout::UNDEFINED);
                assert_ne!(first.src_stages, vk::PipelineStageFlags2::TOP_OF_PIPE);
            }
        }
        assert_eq!(replays, 3);
    }

    #[test]
    fn reuse_can_be_disabled() {
        let device = Arc::new(NullDevice::new());
        let config = FrameConfig::default().with(|c| c.reuse_command_buffers = false);
        let mut frames = orchestrator(&device, 1, config);
        frames.render_frame().unwrap();
        assert!(frames.render_frame().unwrap().recorded);
        assert_eq!(frames.backend().records, 2);
    }

    #[test]
    fn disabling_a_pass_forces_recording() {
        let device = Arc::new(NullDevice::new());
        let mut frames = orchestrator(&device, 1, FrameConfig::default());
        frames.render_frame().unwrap();
        frames.set_pass_enabled("scene", false).unwrap();

        let report = frames.render_frame().unwrap();
        assert!(report.recorded);
        let log = frames.backend().last_submitted.clone().unwrap();
        assert_eq!(log.draw_count(), 1);
    }

    #[test]
    fn resize_only_references_live_images() {
        let device = Arc::new(NullDevice::new());
        let mut frames = orchestrator(&device, 2, FrameConfig::default());
        frames.render_frame().unwrap();
        let before = referenced_images(frames.backend().last_submitted.as_ref().unwrap());

        frames.backend_mut().out_of_date = true;
        assert!(matches!(
            frames.render_frame(),
            Err(FrameError::SurfaceOutOfDate)
        ));
        assert_eq!(frames.state(), FrameState::Idle);

        assert_eq!(frames.handle_resize(extent(800, 600)).unwrap(), extent(800, 600));
        let report = frames.render_frame().unwrap();
        assert!(report.recorded);

        let log = frames.backend().last_submitted.clone().unwrap();
        let after = referenced_images(&log);
        assert!(!after.is_empty());
        assert!(after.iter().all(|image| device.is_live_image(*image)));
        assert!(before.iter().all(|image| !device.is_live_image(*image)));
        assert!(
            log.rendering_scopes()
                .iter()
                .all(|scope| scope.extent == extent(800, 600))
        );
    }

    #[test]
    fn failed_recording_restores_layouts() {
        let device = Arc::new(NullDevice::new());
        let backend = NullBackend::new(&device, FORMAT, extent(64, 64), 1).unwrap();
        let mut builder = GraphBuilder::new(&device, extent(64, 64));
        let target = builder.attachment(AttachmentInfo::color(
            "target",
            vk::Format::R8G8B8A8_UNORM,
            AttachmentSize::Swapchain,
        ));
        builder.add_pass(
            PassDescriptor::render("broken", PassKind::Offscreen)
                .write_color(target, LoadPolicy::DontCare)
                .record(|_| anyhow::bail!("no pipeline bound")),
        );
        let mut frames =
            FrameOrchestrator::new(backend, builder.build().unwrap(), FrameConfig::default())
                .unwrap();

        match frames.render_frame() {
            Err(FrameError::Graph(GraphError::Record { pass, .. })) => assert_eq!(pass, "broken"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(frames.graph().layout(target), Some(Layout::Undefined));
        assert_eq!(frames.backend().submits, 0);
    }
}
