use std::fmt;

use crate::{
    config::Config,
    core::deletion::{DeletionQueue, Resource},
    error::{severity, CheckVk, Severity},
    shaders::load_shader_module,
};

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::*;

/// The device operations needed to assemble pipelines.
pub trait PipelineDevice {
    fn create_module(&self, code: &[u32]) -> Result<vk::ShaderModule, vk::ErrorCode>;
    /// # Safety
    ///
    /// The module must be alive and destroyed only once. Pipelines
    /// built from it may outlive it.
    unsafe fn destroy_module(&self, module: vk::ShaderModule);
    fn create_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout, vk::ErrorCode>;
    fn create_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline, vk::ErrorCode>;
}

impl PipelineDevice for Device {
    fn create_module(&self, code: &[u32]) -> Result<vk::ShaderModule, vk::ErrorCode> {
        let info = vk::ShaderModuleCreateInfo::builder()
            .code_size(code.len() * std::mem::size_of::<u32>())
            .code(code);

        unsafe { self.create_shader_module(&info, None) }
    }

    unsafe fn destroy_module(&self, module: vk::ShaderModule) {
        self.destroy_shader_module(module, None)
    }

    fn create_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout, vk::ErrorCode> {
        unsafe { self.create_pipeline_layout(info, None) }
    }

    fn create_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline, vk::ErrorCode> {
        unsafe {
            self.create_graphics_pipelines(vk::PipelineCache::null(), &[*info], None)
                .map(|(pipelines, _)| pipelines[0])
        }
    }
}

/// The two interchangeable ways of drawing the triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineVariant {
    /// Colors interpolated from the vertices.
    Colored,
    /// Plain red.
    Red,
}

impl PipelineVariant {
    pub const ALL: [PipelineVariant; 2] = [PipelineVariant::Colored, PipelineVariant::Red];

    /// Vertex and fragment shader file names.
    pub fn shader_files(self) -> (&'static str, &'static str) {
        match self {
            PipelineVariant::Colored => ("colored_triangle.vert.spv", "colored_triangle.frag.spv"),
            PipelineVariant::Red => ("triangle.vert.spv", "triangle.frag.spv"),
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineVariant::Colored => write!(f, "vertex-colored"),
            PipelineVariant::Red => write!(f, "plain red"),
        }
    }
}

/// Tracks the toggle input: after `n` toggles, variant `n mod 2`
/// of [`PipelineVariant::ALL`] is selected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineSelector {
    toggles: u64,
}

impl PipelineSelector {
    pub fn toggle(&mut self) {
        self.toggles = self.toggles.wrapping_add(1);
        debug!("Selected the {} pipeline.", self.selected());
    }

    pub fn selected(&self) -> PipelineVariant {
        PipelineVariant::ALL[(self.toggles % 2) as usize]
    }
}

/// Pipelines built at startup, sharing one layout. A variant
/// whose shaders could not be loaded is absent.
#[derive(Debug, Clone, Copy)]
pub struct Pipelines {
    pub layout: vk::PipelineLayout,
    pub colored: Option<vk::Pipeline>,
    pub red: Option<vk::Pipeline>,
}

impl Pipelines {
    pub fn get(&self, variant: PipelineVariant) -> Option<vk::Pipeline> {
        match variant {
            PipelineVariant::Colored => self.colored,
            PipelineVariant::Red => self.red,
        }
    }
}

/// Fixed-function state shared by every pipeline of the engine,
/// combined with a set of shader stages at build time.
pub struct PipelineBuilder {
    pub shader_stages: Vec<vk::PipelineShaderStageCreateInfo>,
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub rasterizer: vk::PipelineRasterizationStateCreateInfo,
    pub multisampling: vk::PipelineMultisampleStateCreateInfo,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub layout: vk::PipelineLayout,
}

impl PipelineBuilder {
    /// Triangle lists covering the whole extent, filled, single
    /// sampled, written straight to the color attachment.
    pub fn new(extent: vk::Extent2D, layout: vk::PipelineLayout) -> Self {
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
            .build();

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent)
            .build();

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .build();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::_1)
            .min_sample_shading(1.0)
            .build();

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(false)
            .build();

        Self {
            shader_stages: Vec::new(),
            input_assembly,
            viewport,
            scissor,
            rasterizer,
            multisampling,
            color_blend_attachment,
            layout,
        }
    }

    /// Replaces the shader stages, in the given order.
    pub fn stages(&mut self, stages: &[(vk::ShaderStageFlags, vk::ShaderModule)]) -> &mut Self {
        self.shader_stages = stages
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(module)
                    .name(b"main\0")
                    .build()
            })
            .collect();
        self
    }

    pub fn build<D: PipelineDevice>(
        &self,
        device: &D,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline> {
        // No vertex buffers: the triangle comes from the vertex
        // shader itself.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder();

        let viewports = &[self.viewport];
        let scissors = &[self.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let attachments = &[self.color_blend_attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&self.shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterizer)
            .multisample_state(&self.multisampling)
            .color_blend_state(&color_blend_state)
            .layout(self.layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1);

        Ok(device.create_pipeline(&info).check("vkCreateGraphicsPipelines")?)
    }
}

/// Loads one shader stage. Whether a failure costs the stage or
/// the whole pipeline set is up to the error policy: recoverable
/// errors are logged and give `None`.
fn load_stage<D: PipelineDevice>(
    device: &D,
    config: &Config,
    file: &str,
) -> Result<Option<vk::ShaderModule>> {
    let path = config.shader_path(file);
    let error = match load_shader_module(device, &path) {
        Ok(module) => {
            info!("Shader {path:?} loaded.");
            return Ok(Some(module));
        },
        Err(error) => anyhow::Error::from(error),
    };

    match severity(&error) {
        Severity::Recoverable => {
            warn!("{error:#}");
            Ok(None)
        },
        Severity::Fatal => Err(error),
    }
}

/// Creates the shared layout and one pipeline per variant whose
/// shaders load. Shader modules are destroyed once every pipeline
/// has been built, whether or not building succeeded.
pub fn create_pipelines<D: PipelineDevice>(
    device: &D,
    config: &Config,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    deletion_queue: &mut DeletionQueue,
) -> Result<Pipelines> {
    // Neither variant reads descriptors or push constants.
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    let layout = device.create_layout(&layout_info).check("vkCreatePipelineLayout")?;
    deletion_queue.push(Resource::PipelineLayout(layout));

    let mut loaded = Vec::new();
    let stage_sets = load_variants(device, config, &mut loaded);

    let result = stage_sets.and_then(|stage_sets| {
        build_variants(device, &stage_sets, layout, render_pass, extent, deletion_queue)
    });

    // Each loaded module is listed once, and pipelines don't keep
    // a reference to the modules they were built from.
    for module in loaded {
        unsafe { device.destroy_module(module) };
    }

    result
}

/// Loads the stages of every variant. Modules are collected into
/// `loaded` as soon as they exist, so that they are destroyed even
/// when a later stage fails.
fn load_variants<D: PipelineDevice>(
    device: &D,
    config: &Config,
    loaded: &mut Vec<vk::ShaderModule>,
) -> Result<Vec<(PipelineVariant, vk::ShaderModule, vk::ShaderModule)>> {
    let mut stage_sets = Vec::new();
    for variant in PipelineVariant::ALL {
        let (vertex_file, fragment_file) = variant.shader_files();
        let vertex = load_stage(device, config, vertex_file)?;
        loaded.extend(vertex);
        let fragment = load_stage(device, config, fragment_file)?;
        loaded.extend(fragment);

        match (vertex, fragment) {
            (Some(vertex), Some(fragment)) => stage_sets.push((variant, vertex, fragment)),
            _ => warn!("Skipping the {variant} pipeline."),
        }
    }

    Ok(stage_sets)
}

fn build_variants<D: PipelineDevice>(
    device: &D,
    stage_sets: &[(PipelineVariant, vk::ShaderModule, vk::ShaderModule)],
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    deletion_queue: &mut DeletionQueue,
) -> Result<Pipelines> {
    let mut pipelines = Pipelines {
        layout,
        colored: None,
        red: None,
    };

    let mut builder = PipelineBuilder::new(extent, layout);
    for &(variant, vertex, fragment) in stage_sets {
        let pipeline = builder
            .stages(&[
                (vk::ShaderStageFlags::VERTEX, vertex),
                (vk::ShaderStageFlags::FRAGMENT, fragment),
            ])
            .build(device, render_pass)?;
        deletion_queue.push(Resource::Pipeline(pipeline));

        match variant {
            PipelineVariant::Colored => pipelines.colored = Some(pipeline),
            PipelineVariant::Red => pipelines.red = Some(pipeline),
        }
        info!("Pipeline created ({variant}).");
    }

    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::deletion::Release;
    use std::{cell::RefCell, path::PathBuf};
    use vulkanalia::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreateModule(vk::ShaderModule),
        DestroyModule(vk::ShaderModule),
        CreateLayout(vk::PipelineLayout),
        CreatePipeline {
            pipeline: vk::Pipeline,
            layout: vk::PipelineLayout,
            render_pass: vk::RenderPass,
            modules: Vec<vk::ShaderModule>,
        },
    }

    #[derive(Default)]
    struct MockDevice {
        calls: RefCell<Vec<Call>>,
        fail_pipelines: bool,
    }

    impl MockDevice {
        fn next_handle(&self) -> u64 {
            self.calls.borrow().len() as u64 + 1
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl PipelineDevice for MockDevice {
        fn create_module(&self, _: &[u32]) -> Result<vk::ShaderModule, vk::ErrorCode> {
            let module = vk::ShaderModule::from_raw(self.next_handle());
            self.calls.borrow_mut().push(Call::CreateModule(module));
            Ok(module)
        }

        unsafe fn destroy_module(&self, module: vk::ShaderModule) {
            self.calls.borrow_mut().push(Call::DestroyModule(module));
        }

        fn create_layout(
            &self,
            _: &vk::PipelineLayoutCreateInfo,
        ) -> Result<vk::PipelineLayout, vk::ErrorCode> {
            let layout = vk::PipelineLayout::from_raw(self.next_handle());
            self.calls.borrow_mut().push(Call::CreateLayout(layout));
            Ok(layout)
        }

        fn create_pipeline(
            &self,
            info: &vk::GraphicsPipelineCreateInfo,
        ) -> Result<vk::Pipeline, vk::ErrorCode> {
            if self.fail_pipelines {
                return Err(vk::ErrorCode::OUT_OF_DEVICE_MEMORY);
            }

            let stages = unsafe {
                std::slice::from_raw_parts(info.stages, info.stage_count as usize)
            };
            let pipeline = vk::Pipeline::from_raw(self.next_handle());
            self.calls.borrow_mut().push(Call::CreatePipeline {
                pipeline,
                layout: info.layout,
                render_pass: info.render_pass,
                modules: stages.iter().map(|s| s.module).collect(),
            });
            Ok(pipeline)
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<Resource>);

    impl Release for Recorder {
        unsafe fn release(&mut self, resource: Resource) {
            self.0.push(resource);
        }
    }

    /// A temporary shader directory, removed when dropped.
    struct ShaderDir {
        config: Config,
    }

    impl Drop for ShaderDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.config.shader_dir);
        }
    }

    fn shader_dir(name: &str, files: &[&str]) -> ShaderDir {
        let dir = std::env::temp_dir().join(format!("trigon-shaders-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let spirv = [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_ne_bytes())
            .collect::<Vec<_>>();
        for file in files {
            std::fs::write(dir.join(file), &spirv).unwrap();
        }

        ShaderDir {
            config: Config {
                shader_dir: PathBuf::from(dir),
                ..Config::default()
            },
        }
    }

    fn all_shader_files() -> Vec<&'static str> {
        PipelineVariant::ALL
            .iter()
            .flat_map(|v| {
                let (vertex, fragment) = v.shader_files();
                [vertex, fragment]
            })
            .collect()
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D { width: 1700, height: 900 }
    }

    #[test]
    fn toggling_selects_variant_n_mod_2() {
        let mut selector = PipelineSelector::default();
        assert_eq!(selector.selected(), PipelineVariant::Colored);

        for n in 1..=7u64 {
            selector.toggle();
            assert_eq!(selector.selected(), PipelineVariant::ALL[(n % 2) as usize]);
        }
    }

    #[test]
    fn variants_are_distinct_and_share_one_layout() {
        let device = MockDevice::default();
        let shaders = shader_dir("distinct", &all_shader_files());
        let render_pass = vk::RenderPass::from_raw(99);
        let mut queue = DeletionQueue::default();

        let pipelines = create_pipelines(&device, &shaders.config, render_pass, extent(), &mut queue).unwrap();

        let colored = pipelines.colored.unwrap();
        let red = pipelines.red.unwrap();
        assert_ne!(colored, red);

        let created = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreatePipeline { layout, render_pass, modules, .. } => {
                    Some((layout, render_pass, modules))
                },
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|(l, rp, _)| *l == pipelines.layout && *rp == render_pass));
        assert_ne!(created[0].2, created[1].2);

        // Each pipeline is released on its own, before the layout.
        let mut recorder = Recorder::default();
        unsafe { queue.flush(&mut recorder) };
        assert_eq!(recorder.0, vec![
            Resource::Pipeline(red),
            Resource::Pipeline(colored),
            Resource::PipelineLayout(pipelines.layout),
        ]);
    }

    #[test]
    fn modules_are_destroyed_once_after_every_pipeline() {
        let device = MockDevice::default();
        let shaders = shader_dir("lifecycle", &all_shader_files());
        let mut queue = DeletionQueue::default();

        create_pipelines(&device, &shaders.config, vk::RenderPass::from_raw(1), extent(), &mut queue).unwrap();

        let calls = device.calls();
        let last_pipeline = calls
            .iter()
            .rposition(|c| matches!(c, Call::CreatePipeline { .. }))
            .unwrap();

        let created = calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateModule(m) => Some(*m),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(created.len(), 4);

        for module in created {
            let destroyed = calls
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == Call::DestroyModule(module))
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            assert_eq!(destroyed.len(), 1, "{module:?} destroyed {} times", destroyed.len());
            assert!(destroyed[0] > last_pipeline);
        }
    }

    #[test]
    fn missing_shader_skips_its_variant() {
        let device = MockDevice::default();
        let (vertex, _) = PipelineVariant::Red.shader_files();
        let (colored_vertex, colored_fragment) = PipelineVariant::Colored.shader_files();
        let shaders = shader_dir("missing", &[vertex, colored_vertex, colored_fragment]);
        let mut queue = DeletionQueue::default();

        let pipelines = create_pipelines(&device, &shaders.config, vk::RenderPass::from_raw(1), extent(), &mut queue).unwrap();

        assert!(pipelines.get(PipelineVariant::Colored).is_some());
        assert!(pipelines.get(PipelineVariant::Red).is_none());

        // The lone red vertex module is still cleaned up.
        let calls = device.calls();
        let created = calls.iter().filter(|c| matches!(c, Call::CreateModule(_))).count();
        let destroyed = calls.iter().filter(|c| matches!(c, Call::DestroyModule(_))).count();
        assert_eq!((created, destroyed), (3, 3));
    }

    #[test]
    fn pipeline_failure_still_destroys_modules() {
        let device = MockDevice {
            fail_pipelines: true,
            ..MockDevice::default()
        };
        let shaders = shader_dir("failure", &all_shader_files());
        let mut queue = DeletionQueue::default();

        let result = create_pipelines(&device, &shaders.config, vk::RenderPass::from_raw(1), extent(), &mut queue);

        assert!(result.is_err());
        let destroyed = device.calls().iter().filter(|c| matches!(c, Call::DestroyModule(_))).count();
        assert_eq!(destroyed, 4);
        // Only the layout made it to the deletion queue.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unreadable_shader_is_skipped_by_the_error_policy() {
        let device = MockDevice::default();
        let shaders = shader_dir("policy", &[]);
        std::fs::write(shaders.config.shader_path("empty.spv"), b"").unwrap();

        let empty = load_stage(&device, &shaders.config, "empty.spv").unwrap();
        let absent = load_stage(&device, &shaders.config, "absent.spv").unwrap();

        assert_eq!((empty, absent), (None, None));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn shader_directories_are_removed_after_use() {
        let path = {
            let shaders = shader_dir("cleanup", &all_shader_files());
            assert!(shaders.config.shader_dir.is_dir());
            shaders.config.shader_dir.clone()
        };

        assert!(!path.exists());
    }
}
