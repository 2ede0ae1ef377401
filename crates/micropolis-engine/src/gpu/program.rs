use std::borrow::Cow;
use std::fmt;
use std::panic::Location;

use crate::error::{ReyesError, Result};

/// Compile-time constant prepended to a program's WGSL source.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Constant {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
}

impl Constant {
    fn wgsl_type(&self) -> &'static str {
        match self {
            Constant::U32(_) => "u32",
            Constant::I32(_) => "i32",
            Constant::F32(_) => "f32",
            Constant::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::U32(v) => write!(f, "{v}u"),
            Constant::I32(v) => write!(f, "{v}i"),
            Constant::F32(v) => write!(f, "{v:?}f"),
            Constant::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<u32> for Constant {
    fn from(v: u32) -> Self {
        Constant::U32(v)
    }
}

impl From<i32> for Constant {
    fn from(v: i32) -> Self {
        Constant::I32(v)
    }
}

impl From<f32> for Constant {
    fn from(v: f32) -> Self {
        Constant::F32(v)
    }
}

impl From<bool> for Constant {
    fn from(v: bool) -> Self {
        Constant::Bool(v)
    }
}

/// WGSL source assembled from parts plus named constants.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    parts: Vec<Cow<'static, str>>,
    constants: Vec<(String, Constant)>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Appends a source part. Parts are concatenated in order.
    pub fn source(mut self, part: impl Into<Cow<'static, str>>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Defines (or redefines) `const NAME` ahead of the source.
    pub fn set_constant(&mut self, name: &str, value: impl Into<Constant>) -> &mut Self {
        let value = value.into();
        match self.constants.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.constants.push((name.to_string(), value)),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full WGSL text as handed to the shader compiler.
    pub fn wgsl(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.constants {
            out.push_str(&format!("const {name}: {} = {value};\n", value.wgsl_type()));
        }
        for part in &self.parts {
            out.push('\n');
            out.push_str(part);
        }
        out
    }

    #[track_caller]
    pub fn build(&self, device: &wgpu::Device) -> Result<BuiltProgram> {
        let location = Location::caller();
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&self.name),
            source: wgpu::ShaderSource::Wgsl(self.wgsl().into()),
        });
        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(ReyesError::KernelBuild {
                program: self.name.clone(),
                kernel: "<module>".into(),
                message: err.to_string(),
                location,
            });
        }
        log::debug!("built program `{}`", self.name);

        Ok(BuiltProgram {
            name: self.name.clone(),
            module,
        })
    }
}

/// Compiled shader module; hands out one [`Kernel`] per entry point.
#[derive(Debug, Clone)]
pub struct BuiltProgram {
    name: String,
    module: wgpu::ShaderModule,
}

impl BuiltProgram {
    #[track_caller]
    pub fn kernel(&self, device: &wgpu::Device, entry: &str) -> Result<Kernel> {
        let location = Location::caller();
        let label = format!("{}::{entry}", self.name);

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: None,
            module: &self.module,
            entry_point: Some(entry),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(ReyesError::KernelBuild {
                program: self.name.clone(),
                kernel: entry.to_string(),
                message: err.to_string(),
                location,
            });
        }

        Ok(Kernel {
            name: label,
            pipeline,
        })
    }
}

/// One compute entry point with its pipeline.
///
/// Bind group layouts are derived from the entry point, so a bind group must
/// list exactly the bindings the entry point uses.
#[derive(Debug, Clone)]
pub struct Kernel {
    name: String,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Binds whole buffers at the given binding indices of `group`.
    pub fn bind(
        &self,
        device: &wgpu::Device,
        group: u32,
        buffers: &[(u32, &wgpu::Buffer)],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.name),
            layout: &self.pipeline.get_bind_group_layout(group),
            entries: &entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_prepended_in_definition_order() {
        let mut program = Program::new("test").source("fn f() -> u32 { return TILE; }");
        program.set_constant("TILE", 8u32);
        program.set_constant("LIMIT", 32.0f32);
        program.set_constant("CULL", true);

        let text = program.wgsl();
        let tile = text.find("const TILE: u32 = 8u;").unwrap();
        let limit = text.find("const LIMIT: f32 = 32.0f;").unwrap();
        assert!(tile < limit);
        assert!(text.contains("const CULL: bool = true;"));
        assert!(text.ends_with("fn f() -> u32 { return TILE; }"));
    }

    #[test]
    fn redefining_a_constant_replaces_it() {
        let mut program = Program::new("test");
        program.set_constant("N", 1u32).set_constant("N", 2u32);
        let text = program.wgsl();
        assert!(text.contains("const N: u32 = 2u;"));
        assert!(!text.contains("= 1u"));
    }
}
