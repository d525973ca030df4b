use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error};
use pollster::FutureExt as _;

const FALLBACK_SOURCE: &str = include_str!("../shaders/fallback.wgsl");

pub struct CachedShader {
    pub module: wgpu::ShaderModule,
    /// The program failed to load or compile, draws using it ignore their bindings
    pub is_fallback: bool,
}

/// Programs by name, loaded from `<shader_dir>/<name>.wgsl` on first use
pub struct ShaderCache {
    shader_dir: PathBuf,
    pub cache: HashMap<String, Arc<CachedShader>>,
}

impl ShaderCache {
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, program: &str, device: &wgpu::Device) -> Arc<CachedShader> {
        let path = self.shader_dir.join(format!("{}.wgsl", program));
        self.cache
            .entry(program.to_string())
            .or_insert_with(|| Arc::new(create_shader_module(device, program, &path)))
            .clone()
    }

    /// Drops every compiled module so edited sources are picked up on next use
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn create_shader_module(device: &wgpu::Device, program: &str, path: &Path) -> CachedShader {
    let source = std::fs::read_to_string(path).and_then(|source| expand_includes(&source, path));
    let source = match source {
        Ok(source) => source,
        Err(e) => {
            error!("error reading shader {}: {}", path.display(), e);
            return fallback(device);
        }
    };

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match device.pop_error_scope().block_on() {
        Some(e) => {
            error!("shader '{}' failed to compile: {}", program, e);
            fallback(device)
        }
        None => {
            debug!("compiled shader '{}'", program);
            CachedShader {
                module,
                is_fallback: false,
            }
        }
    }
}

/// Inlines `#include "file.wgsl"` lines, resolved next to the including file. Not recursive.
pub fn expand_includes(source: &str, path: &Path) -> std::io::Result<String> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut expanded = String::with_capacity(source.len());
    for line in source.lines() {
        match line.trim().strip_prefix("#include ") {
            Some(name) => {
                let included = dir.join(name.trim().trim_matches('"'));
                expanded.push_str(&std::fs::read_to_string(&included)?);
            }
            None => expanded.push_str(line),
        }
        expanded.push('\n');
    }
    Ok(expanded)
}

fn fallback(device: &wgpu::Device) -> CachedShader {
    CachedShader {
        module: device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fallback"),
            source: wgpu::ShaderSource::Wgsl(FALLBACK_SOURCE.into()),
        }),
        is_fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_are_inlined_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("common.wgsl"), "const K: f32 = 1.0;\n").unwrap();
        let path = dir.path().join("main.wgsl");

        let expanded =
            expand_includes("// head\n#include \"common.wgsl\"\nfn f() {}\n", &path).unwrap();

        assert_eq!(expanded, "// head\nconst K: f32 = 1.0;\n\nfn f() {}\n");
    }

    #[test]
    fn missing_include_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.wgsl");
        assert!(expand_includes("#include \"nope.wgsl\"", &path).is_err());
    }
}
