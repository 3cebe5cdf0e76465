//! GPU runtime backing the CUDA and cuDNN contexts.
//!
//! This module owns the single `wgpu` device and queue of the process,
//! validates and compiles the WGSL kernels once, and launches them on
//! request. It is initialized lazily on first use (via `lazy_static`); a
//! machine without a usable adapter yields `None` from [`runtime`] and every
//! GPU context creation fails with a device failure.
//!
//! Kernels upload host data, dispatch, and read the result back. The
//! caller's context then waits on the queue in `finish_device_computation`.

use std::sync::mpsc;

use briny::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

mod kernels;

const BINARY: &str = include_str!("../shaders/binary.wgsl");
const RELU: &str = include_str!("../shaders/relu.wgsl");

const WORKGROUP_SIZE: u32 = 64;

/// Failures of the GPU runtime.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No adapter matched the request.
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to create a device.
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    /// Waiting on the queue failed.
    #[error("poll error: {0}")]
    Poll(#[from] wgpu::PollError),
    /// Mapping a readback buffer failed.
    #[error("buffer map error: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    /// A bundled shader did not pass validation.
    #[error("shader `{0}` failed validation")]
    Shader(&'static str),
    /// The readback channel closed before the map completed.
    #[error("readback was abandoned")]
    Readback,
    /// The launch does not fit the dispatch limits.
    #[error("{0} elements exceed the dispatch range")]
    TooLarge(usize),
}

/// Secure wrapper for bundled WGSL source.
struct WgslSource<'a>(&'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;
        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("#include") || src.contains("import") {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// A compiled compute kernel and the layout of its bind group.
struct Pipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// The process-wide device, queue and compiled kernels.
pub struct GpuRuntime {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The queue commands are submitted to.
    pub queue: wgpu::Queue,
    binary: Pipeline,
    relu: Pipeline,
}

lazy_static::lazy_static! {
    static ref GPU_RUNTIME: Option<GpuRuntime> = match GpuRuntime::new() {
        Ok(runtime) => Some(runtime),
        Err(err) => {
            warn!(error = %err, "GPU runtime unavailable");
            None
        }
    };
}

/// The shared runtime, or `None` when no GPU could be initialized.
pub fn runtime() -> Option<&'static GpuRuntime> {
    GPU_RUNTIME.as_ref()
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn to_bytes(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl GpuRuntime {
    /// Selects the default adapter, creates a device and compiles every kernel.
    ///
    /// # Errors
    ///
    /// Adapter or device acquisition failures, or a bundled shader failing validation.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("opcore"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;
        debug!(adapter = ?adapter.get_info().name, "GPU runtime initialized");

        let binary = Self::compile(
            &device,
            "binary",
            BINARY,
            &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                uniform_entry(3),
            ],
        )?;
        let relu = Self::compile(
            &device,
            "relu",
            RELU,
            &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
        )?;

        Ok(Self {
            device,
            queue,
            binary,
            relu,
        })
    }

    fn compile(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Pipeline, GpuError> {
        let source = TrustedData::new(WgslSource(source))
            .map_err(|_| GpuError::Shader(label))?
            .into_inner();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.0.into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        Ok(Pipeline { layout, pipeline })
    }

    /// Uploads `inputs`, runs `pipeline` over `len` elements and reads the
    /// `len`-element output back. Bindings are the inputs in order, then the
    /// output, then the uniform `params`.
    fn launch(&self, kernel: &Pipeline, label: &str, inputs: &[&[f32]], params: &[u8], len: usize) -> Result<Vec<f32>, GpuError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let groups = u32::try_from(len)
            .map_err(|_| GpuError::TooLarge(len))?
            .div_ceil(WORKGROUP_SIZE);
        let size = (len * size_of::<f32>()) as u64;

        let input_bufs: Vec<wgpu::Buffer> = inputs
            .iter()
            .map(|data| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: &to_bytes(data),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();
        let output_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: params,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = input_bufs
            .iter()
            .enumerate()
            .map(|(i, buf)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buf.as_entire_binding(),
            })
            .collect();
        let next = entries.len() as u32;
        entries.push(wgpu::BindGroupEntry {
            binding: next,
            resource: output_buf.as_entire_binding(),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: next + 1,
            resource: params_buf.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&output_buf, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::Wait)?;
        rx.recv().map_err(|_| GpuError::Readback)??;

        let view = staging.slice(..).get_mapped_range();
        let out = from_bytes(&view);
        drop(view);
        staging.unmap();
        Ok(out)
    }

    /// Element-wise `a (op) b`; `b` may hold a single element.
    ///
    /// # Errors
    ///
    /// Any runtime failure during upload, dispatch or readback.
    pub fn binary(&self, op: u32, a: &[f32], b: &[f32]) -> Result<Vec<f32>, GpuError> {
        let len = u32::try_from(a.len()).map_err(|_| GpuError::TooLarge(a.len()))?;
        let b_len = u32::try_from(b.len()).map_err(|_| GpuError::TooLarge(b.len()))?;
        let params: Vec<u8> = [op, len, b_len, 0].iter().flat_map(|x| x.to_le_bytes()).collect();
        self.launch(&self.binary, "binary", &[a, b], &params, a.len())
    }

    /// Leaky rectifier with negative `slope`.
    ///
    /// # Errors
    ///
    /// Any runtime failure during upload, dispatch or readback.
    pub fn relu(&self, x: &[f32], slope: f32) -> Result<Vec<f32>, GpuError> {
        let len = u32::try_from(x.len()).map_err(|_| GpuError::TooLarge(x.len()))?;
        let mut params = Vec::with_capacity(16);
        params.extend_from_slice(&len.to_le_bytes());
        params.extend_from_slice(&slope.to_le_bytes());
        params.extend_from_slice(&[0u8; 8]);
        self.launch(&self.relu, "relu", &[x], &params, x.len())
    }

    /// Blocks until the queue is idle.
    ///
    /// # Errors
    ///
    /// Device loss or timeout reported by `wgpu`.
    pub fn synchronize(&self) -> Result<(), GpuError> {
        self.device.poll(wgpu::PollType::Wait)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_shaders_pass_validation() {
        assert!(TrustedData::new(WgslSource(BINARY)).is_ok());
        assert!(TrustedData::new(WgslSource(RELU)).is_ok());
        assert!(TrustedData::new(WgslSource("@compute fn other() {}")).is_err());
    }

    #[test]
    fn byte_conversion_preserves_values() {
        let data = [1.5f32, -2.0, 0.0];
        assert_eq!(from_bytes(&to_bytes(&data)), data);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn binary_add_broadcasts_scalar() {
        let runtime = runtime().expect("no GPU");
        let out = runtime.binary(0, &[1.0, 2.0, 3.0], &[10.0]).unwrap();
        assert_eq!(out, vec![11.0, 12.0, 13.0]);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn relu_applies_slope() {
        let runtime = runtime().expect("no GPU");
        let out = runtime.relu(&[-2.0, 0.0, 3.0], 0.5).unwrap();
        assert_eq!(out, vec![-1.0, 0.0, 3.0]);
    }
}
