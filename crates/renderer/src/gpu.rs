use std::num::NonZeroU64;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::{DeviceExt, TextureDataOrder};
use winit::dpi::PhysicalSize;

use cascade::{kernel_path, MATERIAL_TABLE_SIDE};

use crate::compile::{
    load_compute_kernel, load_fragment_shader, load_vertex_shader, validated,
};
use crate::params::{PipelineParameters, RendererConfig};
use crate::plan::{frame_ops, PassOp};

/// Compute kernels run 16x16 work-items per group.
const WORKGROUP_SIZE: u32 = 16;

/// Offset granularity for the per-step merge uniform slots. 256 satisfies
/// every adapter's `min_uniform_buffer_offset_alignment`.
const MERGE_UNIFORM_STRIDE: u64 = 256;

/// Owns every GPU resource of the cascade pipeline.
///
/// All buffers and kernel handles are created once at setup for the run's
/// fixed level count and stay resident for the process lifetime; per-frame
/// work only overwrites their contents. `GpuState` is the sole writer of
/// the cascade buffers.
pub(crate) struct GpuState {
    _instance: wgpu::Instance,
    limits: wgpu::Limits,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    world_size: (u32, u32),
    level_count: u32,
    uniforms: FrameUniforms,
    frame_uniform_buffer: wgpu::Buffer,
    gather_pipelines: Vec<wgpu::ComputePipeline>,
    gather_bind_groups: Vec<wgpu::BindGroup>,
    merge_pipeline: wgpu::ComputePipeline,
    /// Bind group for folding source level `s` into `s - 1`, indexed by `s - 1`.
    merge_bind_groups: Vec<wgpu::BindGroup>,
    resolve_pipeline: wgpu::RenderPipeline,
    /// One resolve bind group per displayable layer.
    resolve_bind_groups: Vec<wgpu::BindGroup>,
    _merge_uniform_buffer: wgpu::Buffer,
    _cascade_buffers: Vec<wgpu::Buffer>,
    _scene_raster: wgpu::Texture,
    _material_table: wgpu::Texture,
}

impl GpuState {
    pub(crate) fn new<T>(
        target: &T,
        initial_size: PhysicalSize<u32>,
        config: &RendererConfig,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = wgpu::Instance::default();
        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let limits = adapter.limits();
        let max_dimension = limits.max_texture_dimension_2d;
        let requested_width = initial_size.width.max(1);
        let requested_height = initial_size.height.max(1);
        if requested_width > max_dimension || requested_height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {requested_width}x{requested_height}"
            );
        }

        let (world_width, world_height) = (config.scene.world_size[0], config.scene.world_size[1]);
        if world_width > max_dimension || world_height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, scene raster is {world_width}x{world_height}"
            );
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("radview device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let size = PhysicalSize::new(requested_width, requested_height);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &surface_config);

        let level_count = config.level_count;
        let uniforms = FrameUniforms::new(
            world_width,
            world_height,
            level_count,
            &config.initial_params,
        );
        let frame_uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("nearest sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Scene raster: single-channel occupancy/emission ids. Written once
        // by the bake pass, read-only to every gather kernel afterwards.
        let scene_raster = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("scene raster"),
            size: wgpu::Extent3d {
                width: world_width,
                height: world_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let scene_raster_view = scene_raster.create_view(&wgpu::TextureViewDescriptor::default());

        let material_table = upload_material_table(&device, &queue, &config.scene.material_texels());
        let material_view = material_table.create_view(&wgpu::TextureViewDescriptor::default());

        // One storage buffer of raw directional samples per cascade level.
        let texel_count = world_width as u64 * world_height as u64;
        let cascade_buffers: Vec<wgpu::Buffer> = (0..level_count)
            .map(|level| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("cascade level {level}")),
                    size: texel_count * 16,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
            .collect();

        bake_scene(
            &device,
            &queue,
            config,
            &frame_uniform_buffer,
            &nearest_sampler,
            &scene_raster_view,
            (world_width, world_height),
        )?;

        let (gather_pipelines, gather_bind_groups) = build_gather_pipelines(
            &device,
            config,
            &frame_uniform_buffer,
            &nearest_sampler,
            &scene_raster_view,
            &material_view,
            &cascade_buffers,
        )?;

        let (merge_pipeline, merge_bind_groups, merge_uniform_buffer) = build_merge_pipeline(
            &device,
            &queue,
            &config.merge_kernel,
            &frame_uniform_buffer,
            &cascade_buffers,
        )?;

        let (resolve_pipeline, resolve_bind_groups) = build_resolve_pipeline(
            &device,
            config,
            surface_format,
            &frame_uniform_buffer,
            &cascade_buffers,
        )?;

        tracing::info!(
            levels = level_count,
            world = format!("{world_width}x{world_height}"),
            surface = format!("{}x{}", size.width, size.height),
            "cascade pipeline initialised"
        );

        Ok(Self {
            _instance: instance,
            limits,
            surface,
            device,
            queue,
            config: surface_config,
            size,
            world_size: (world_width, world_height),
            level_count,
            uniforms,
            frame_uniform_buffer,
            gather_pipelines,
            gather_bind_groups,
            merge_pipeline,
            merge_bind_groups,
            resolve_pipeline,
            resolve_bind_groups,
            _merge_uniform_buffer: merge_uniform_buffer,
            _cascade_buffers: cascade_buffers,
            _scene_raster: scene_raster,
            _material_table: material_table,
        })
    }

    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        let max_dimension = self.limits.max_texture_dimension_2d;
        if new_size.width > max_dimension || new_size.height > max_dimension {
            tracing::warn!(
                new_width = new_size.width,
                new_height = new_size.height,
                max_dimension,
                "requested resize exceeds GPU limits; keeping previous size"
            );
            return;
        }

        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Records and submits one frame: gather all levels, fold the cascade,
    /// resolve to the swapchain.
    pub(crate) fn render_frame(
        &mut self,
        params: &PipelineParameters,
    ) -> Result<(), wgpu::SurfaceError> {
        let ops = frame_ops(self.level_count, params);
        if ops.is_empty() {
            return Ok(());
        }

        self.uniforms.update(params);
        self.queue.write_buffer(
            &self.frame_uniform_buffer,
            0,
            bytemuck::bytes_of(&self.uniforms),
        );

        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("cascade frame"),
            });

        let (groups_x, groups_y) = self.workgroup_counts();
        // Passes are detached from the encoder borrow so one can stay open
        // across loop iterations; every pass is dropped before finish().
        let mut compute: Option<wgpu::ComputePass<'static>> = None;
        for op in &ops {
            match *op {
                PassOp::Gather { level } => {
                    let pass = compute.get_or_insert_with(|| {
                        encoder
                            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                                label: Some("gather"),
                                timestamp_writes: None,
                            })
                            .forget_lifetime()
                    });
                    pass.set_pipeline(&self.gather_pipelines[level as usize]);
                    pass.set_bind_group(0, &self.gather_bind_groups[level as usize], &[]);
                    pass.dispatch_workgroups(groups_x, groups_y, 1);
                }
                PassOp::Barrier => {
                    // Closing the compute pass is the synchronization point:
                    // wgpu orders the next pass's reads after this pass's
                    // buffer writes.
                    compute = None;
                }
                PassOp::Merge { source_level } => {
                    let pass = compute.get_or_insert_with(|| {
                        encoder
                            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                                label: Some("merge"),
                                timestamp_writes: None,
                            })
                            .forget_lifetime()
                    });
                    pass.set_pipeline(&self.merge_pipeline);
                    pass.set_bind_group(
                        0,
                        &self.merge_bind_groups[source_level as usize - 1],
                        &[],
                    );
                    pass.dispatch_workgroups(groups_x, groups_y, 1);
                }
                PassOp::Resolve { layer } => {
                    compute = None;
                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("resolve"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &view,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        occlusion_query_set: None,
                        timestamp_writes: None,
                    });
                    render_pass.set_pipeline(&self.resolve_pipeline);
                    render_pass.set_bind_group(0, &self.resolve_bind_groups[layer as usize], &[]);
                    render_pass.draw(0..3, 0..1);
                }
            }
        }
        drop(compute);

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        tracing::trace!(
            levels = self.level_count,
            merge = params.apply_merge,
            "presented cascade frame"
        );
        Ok(())
    }

    fn workgroup_counts(&self) -> (u32, u32) {
        (
            self.world_size.0.div_ceil(WORKGROUP_SIZE),
            self.world_size.1.div_ceil(WORKGROUP_SIZE),
        )
    }
}

/// CPU mirror of the `FrameParams` uniform block shared by every kernel.
///
/// Must observe std140 layout rules; see the layout test below.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct FrameUniforms {
    world_size: [i32; 2],
    level_count: i32,
    ray_length_multiplier: i32,
    display_layer: i32,
    interpolate: i32,
    probe_uv: i32,
    merge_enabled: i32,
}

unsafe impl Zeroable for FrameUniforms {}
unsafe impl Pod for FrameUniforms {}

impl FrameUniforms {
    fn new(world_width: u32, world_height: u32, level_count: u32, params: &PipelineParameters) -> Self {
        let mut uniforms = Self {
            world_size: [world_width as i32, world_height as i32],
            level_count: level_count as i32,
            ray_length_multiplier: 1,
            display_layer: 0,
            interpolate: 1,
            probe_uv: 0,
            merge_enabled: 1,
        };
        uniforms.update(params);
        uniforms
    }

    fn update(&mut self, params: &PipelineParameters) {
        self.ray_length_multiplier = params.ray_length_multiplier;
        self.display_layer = params.display_layer as i32;
        self.interpolate = params.interpolate as i32;
        self.probe_uv = params.probe_uv as i32;
        self.merge_enabled = params.apply_merge as i32;
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct MergeUniforms {
    source_level: i32,
    _padding: [i32; 3],
}

unsafe impl Zeroable for MergeUniforms {}
unsafe impl Pod for MergeUniforms {}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_buffer_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn upload_material_table(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texels: &[[f32; 4]],
) -> wgpu::Texture {
    device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("material table"),
            size: wgpu::Extent3d {
                width: MATERIAL_TABLE_SIDE as u32,
                height: MATERIAL_TABLE_SIDE as u32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(texels),
    )
}

/// Runs the scene bake pass: decode the source image, upload it, and let
/// the bake kernel write material ids into the scene raster. Happens once
/// at setup, never mid-frame.
fn bake_scene(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    config: &RendererConfig,
    frame_uniform_buffer: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    scene_raster_view: &wgpu::TextureView,
    world_size: (u32, u32),
) -> Result<()> {
    let image = load_scene_image(config, world_size)?;

    let source_texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("scene source image"),
            size: wgpu::Extent3d {
                width: world_size.0,
                height: world_size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        image.as_raw(),
    );
    let source_view = source_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let module = load_compute_kernel(device, "scene bake", &config.bake_kernel)?;

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("bake layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::COMPUTE),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::R32Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("bake pipeline layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = validated(device, "scene bake pipeline", || {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("scene bake"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    })?;

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("bake bind group"),
        layout: &layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&source_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(scene_raster_view),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("scene bake"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("scene bake"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(
            world_size.0.div_ceil(WORKGROUP_SIZE),
            world_size.1.div_ceil(WORKGROUP_SIZE),
            1,
        );
    }
    queue.submit(std::iter::once(encoder.finish()));
    tracing::info!("scene raster baked");
    Ok(())
}

fn load_scene_image(config: &RendererConfig, world_size: (u32, u32)) -> Result<RgbaImage> {
    let image = match config.scene_image.as_deref() {
        Some(path) => {
            let decoded = image::open(path)
                .with_context(|| format!("failed to open scene image at {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded scene image");
            decoded.to_rgba8()
        }
        None => {
            tracing::info!("no scene image configured; using built-in test scene");
            builtin_test_scene(world_size.0, world_size.1)
        }
    };

    if image.dimensions() == world_size {
        return Ok(image);
    }
    Ok(image::imageops::resize(
        &image,
        world_size.0,
        world_size.1,
        image::imageops::FilterType::Nearest,
    ))
}

/// Small hardcoded scene: border walls plus two emissive blocks, with the
/// material id encoded in the red channel.
fn builtin_test_scene(width: u32, height: u32) -> RgbaImage {
    let mut image = RgbaImage::new(width, height);
    let wall = image::Rgba([2, 0, 0, 255]);
    let light = image::Rgba([1, 0, 0, 255]);

    let border = (width.min(height) / 128).max(2);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if x < border || y < border || x >= width - border || y >= height - border {
            *pixel = wall;
        }
    }

    let block = (width.min(height) / 16).max(4);
    fill_block(&mut image, width / 4, height / 2, block, light);
    fill_block(&mut image, 3 * width / 4, height / 3, block, light);
    fill_block(&mut image, width / 2, 2 * height / 3, block * 2, wall);
    image
}

fn fill_block(image: &mut RgbaImage, cx: u32, cy: u32, half: u32, value: image::Rgba<u8>) {
    let (width, height) = image.dimensions();
    let x0 = cx.saturating_sub(half);
    let y0 = cy.saturating_sub(half);
    let x1 = (cx + half).min(width);
    let y1 = (cy + half).min(height);
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, value);
        }
    }
}

/// Compiles one gather pipeline per generated kernel and pairs each with a
/// bind group pointing at its own level buffer. A kernel that fails to
/// compile aborts setup; there is no fallback handle.
fn build_gather_pipelines(
    device: &wgpu::Device,
    config: &RendererConfig,
    frame_uniform_buffer: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    scene_raster_view: &wgpu::TextureView,
    material_view: &wgpu::TextureView,
    cascade_buffers: &[wgpu::Buffer],
) -> Result<(Vec<wgpu::ComputePipeline>, Vec<wgpu::BindGroup>)> {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("gather layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::COMPUTE),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            storage_buffer_entry(4, wgpu::ShaderStages::COMPUTE, false),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("gather pipeline layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let mut pipelines = Vec::with_capacity(cascade_buffers.len());
    let mut bind_groups = Vec::with_capacity(cascade_buffers.len());
    for (level, buffer) in cascade_buffers.iter().enumerate() {
        let path = kernel_path(&config.generated_dir, level as u32);
        let label = format!("gather level {level}");
        let module = load_compute_kernel(device, &label, &path)?;
        let pipeline = validated(device, &label, || {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&label),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(scene_raster_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(material_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });

        tracing::debug!(level, path = %path.display(), "gather kernel compiled");
        pipelines.push(pipeline);
        bind_groups.push(bind_group);
    }

    Ok((pipelines, bind_groups))
}

/// Builds the merge pipeline plus one bind group per reduction step.
///
/// Step `s` reads level `s` and read-modify-writes level `s - 1`; the
/// source index for each step lives at a fixed slot of the merge uniform
/// buffer, written once at setup.
fn build_merge_pipeline(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    merge_kernel: &Path,
    frame_uniform_buffer: &wgpu::Buffer,
    cascade_buffers: &[wgpu::Buffer],
) -> Result<(wgpu::ComputePipeline, Vec<wgpu::BindGroup>, wgpu::Buffer)> {
    let module = load_compute_kernel(device, "merge", merge_kernel)?;

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("merge layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::COMPUTE),
            uniform_entry(1, wgpu::ShaderStages::COMPUTE),
            storage_buffer_entry(2, wgpu::ShaderStages::COMPUTE, true),
            storage_buffer_entry(3, wgpu::ShaderStages::COMPUTE, false),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("merge pipeline layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = validated(device, "merge pipeline", || {
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("merge"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    })?;

    let step_count = cascade_buffers.len().saturating_sub(1);
    let merge_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("merge uniforms"),
        size: (step_count.max(1) as u64) * MERGE_UNIFORM_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut bind_groups = Vec::with_capacity(step_count);
    for source_level in 1..cascade_buffers.len() {
        let slot = (source_level - 1) as u64;
        let step = MergeUniforms {
            source_level: source_level as i32,
            _padding: [0; 3],
        };
        queue.write_buffer(
            &merge_uniform_buffer,
            slot * MERGE_UNIFORM_STRIDE,
            bytemuck::bytes_of(&step),
        );

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("merge {source_level} -> {}", source_level - 1)),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &merge_uniform_buffer,
                        offset: slot * MERGE_UNIFORM_STRIDE,
                        size: NonZeroU64::new(std::mem::size_of::<MergeUniforms>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: cascade_buffers[source_level].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: cascade_buffers[source_level - 1].as_entire_binding(),
                },
            ],
        });
        bind_groups.push(bind_group);
    }

    Ok((pipeline, bind_groups, merge_uniform_buffer))
}

/// Builds the resolve pipeline and one bind group per displayable layer.
fn build_resolve_pipeline(
    device: &wgpu::Device,
    config: &RendererConfig,
    surface_format: wgpu::TextureFormat,
    frame_uniform_buffer: &wgpu::Buffer,
    cascade_buffers: &[wgpu::Buffer],
) -> Result<(wgpu::RenderPipeline, Vec<wgpu::BindGroup>)> {
    let vertex_module = load_vertex_shader(device, "resolve vertex", &config.resolve_vertex)?;
    let fragment_module =
        load_fragment_shader(device, "resolve fragment", &config.resolve_fragment)?;

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("resolve layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
            storage_buffer_entry(1, wgpu::ShaderStages::FRAGMENT, true),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("resolve pipeline layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = validated(device, "resolve pipeline", || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("resolve"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        })
    })?;

    let mut bind_groups = Vec::with_capacity(cascade_buffers.len());
    for (layer, buffer) in cascade_buffers.iter().enumerate() {
        bind_groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("resolve layer {layer}")),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
            ],
        }));
    }

    Ok((pipeline, bind_groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn frame_uniforms_follow_std140_layout() {
        let params = PipelineParameters::default();
        let uniforms = FrameUniforms::new(1024, 1024, 6, &params);
        let base = &uniforms as *const _ as usize;

        assert_eq!(align_of::<FrameUniforms>(), 16);
        assert_eq!(size_of::<FrameUniforms>(), 32);
        assert_eq!((&uniforms.world_size as *const _ as usize) - base, 0);
        assert_eq!((&uniforms.level_count as *const _ as usize) - base, 8);
        assert_eq!(
            (&uniforms.ray_length_multiplier as *const _ as usize) - base,
            12
        );
        assert_eq!((&uniforms.display_layer as *const _ as usize) - base, 16);
        assert_eq!((&uniforms.interpolate as *const _ as usize) - base, 20);
        assert_eq!((&uniforms.probe_uv as *const _ as usize) - base, 24);
        assert_eq!((&uniforms.merge_enabled as *const _ as usize) - base, 28);
    }

    #[test]
    fn frame_uniforms_mirror_pipeline_parameters() {
        let params = PipelineParameters {
            ray_length_multiplier: 42,
            apply_merge: false,
            display_layer: 3,
            interpolate: false,
            probe_uv: true,
            paused: false,
        };
        let uniforms = FrameUniforms::new(512, 512, 4, &params);

        assert_eq!(uniforms.ray_length_multiplier, 42);
        assert_eq!(uniforms.merge_enabled, 0);
        assert_eq!(uniforms.display_layer, 3);
        assert_eq!(uniforms.interpolate, 0);
        assert_eq!(uniforms.probe_uv, 1);
        assert_eq!(uniforms.world_size, [512, 512]);
        assert_eq!(uniforms.level_count, 4);
    }

    #[test]
    fn merge_uniform_slots_fit_the_stride() {
        assert!(size_of::<MergeUniforms>() as u64 <= MERGE_UNIFORM_STRIDE);
    }

    #[test]
    fn builtin_scene_has_walls_and_lights() {
        let scene = builtin_test_scene(256, 256);
        assert_eq!(scene.get_pixel(0, 0)[0], 2);
        assert_eq!(scene.get_pixel(64, 128)[0], 1);
        assert_eq!(scene.get_pixel(128, 16)[0], 0);
    }
}
