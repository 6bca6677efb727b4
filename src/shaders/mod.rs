//! GPU program sources and compilation.
//!
//! The seven analysis programs plus the shared fullscreen vertex shader are
//! embedded GLSL, compiled to SPIR-V once at context creation. A shared
//! `bindless.glsl` prelude declares the descriptor arrays and is resolved
//! through shaderc's include callback, as is the colorspace math shared by
//! the transform and compare programs.

use shaderc::{CompileOptions, EnvVersion, ResolvedInclude, ShaderKind, TargetEnv};

use crate::error::{Error, Result};

pub const FULLSCREEN_VERT: &str = include_str!("fullscreen.vert");
pub const YYCXCZ_FRAG: &str = include_str!("yycxcz.frag");
pub const CSF_FILTER_X_COMP: &str = include_str!("csf_filter_x.comp");
pub const CSF_FILTER_Y_COMP: &str = include_str!("csf_filter_y.comp");
pub const FEATURE_FILTER_X_COMP: &str = include_str!("feature_filter_x.comp");
pub const FEATURE_FILTER_Y_COMP: &str = include_str!("feature_filter_y.comp");
pub const COLOR_COMPARE_COMP: &str = include_str!("color_compare.comp");
pub const SUMMARIZE_COMP: &str = include_str!("summarize.comp");
pub const ERROR_COLOR_MAP_FRAG: &str = include_str!("error_color_map.frag");

const BINDLESS_INCLUDE: &str = include_str!("bindless.glsl");
const COLORSPACE_INCLUDE: &str = include_str!("colorspace.glsl");

pub(crate) fn resolve_include(name: &str) -> Option<&'static str> {
    match name {
        "bindless.glsl" => Some(BINDLESS_INCLUDE),
        "colorspace.glsl" => Some(COLORSPACE_INCLUDE),
        _ => None,
    }
}

pub struct Compiler {
    compiler: shaderc::Compiler,
}

impl Compiler {
    pub fn new() -> Result<Compiler> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::ShaderCompilation("shaderc is unavailable".to_string()))?;
        Ok(Compiler { compiler })
    }

    pub fn compile(&self, source: &str, kind: ShaderKind, name: &str) -> Result<Vec<u32>> {
        let mut options = CompileOptions::new()
            .ok_or_else(|| Error::ShaderCompilation("shaderc options unavailable".to_string()))?;
        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_2 as u32);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        options.set_include_callback(|requested, _include_type, _source, _depth| {
            resolve_include(requested)
                .map(|content| ResolvedInclude {
                    resolved_name: requested.to_string(),
                    content: content.to_string(),
                })
                .ok_or_else(|| format!("unknown include {requested}"))
        });

        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&options))
            .map_err(|err| Error::ShaderCompilation(err.to_string()))?;
        Ok(artifact.as_binary().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_resolve() {
        assert!(resolve_include("bindless.glsl").is_some());
        assert!(resolve_include("colorspace.glsl").is_some());
        assert!(resolve_include("missing.glsl").is_none());
    }

    // Compiles every program on the CPU; catches GLSL regressions without a
    // device.
    #[test]
    fn all_programs_compile() {
        let compiler = Compiler::new().unwrap();
        let programs = [
            (FULLSCREEN_VERT, ShaderKind::Vertex, "fullscreen.vert"),
            (YYCXCZ_FRAG, ShaderKind::Fragment, "yycxcz.frag"),
            (CSF_FILTER_X_COMP, ShaderKind::Compute, "csf_filter_x.comp"),
            (CSF_FILTER_Y_COMP, ShaderKind::Compute, "csf_filter_y.comp"),
            (
                FEATURE_FILTER_X_COMP,
                ShaderKind::Compute,
                "feature_filter_x.comp",
            ),
            (
                FEATURE_FILTER_Y_COMP,
                ShaderKind::Compute,
                "feature_filter_y.comp",
            ),
            (COLOR_COMPARE_COMP, ShaderKind::Compute, "color_compare.comp"),
            (SUMMARIZE_COMP, ShaderKind::Compute, "summarize.comp"),
            (
                ERROR_COLOR_MAP_FRAG,
                ShaderKind::Fragment,
                "error_color_map.frag",
            ),
        ];
        for (source, kind, name) in programs {
            let spirv = compiler.compile(source, kind, name).unwrap();
            assert!(!spirv.is_empty(), "{name} produced no SPIR-V");
        }
    }
}
