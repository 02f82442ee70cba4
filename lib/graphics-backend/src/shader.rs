use std::io::Write as _;
use std::process::Command;

use ash::vk;
use graphics_backend_traits::{ShaderCompileError, ShaderLang, ShaderSource, MAX_COMPILED_SHADER_BYTES};

/// Turns a [`ShaderSource`] into a `VkShaderModule`, either straight from
/// pre-compiled SPIR-V or by piping source text through an external compiler
/// (`glslc`, falling back to `glslangValidator`). The shader toolchain itself
/// is out of scope; this is just the thin wire between "bytes" and a module.
pub fn create_shader_module(
    raw_device: &ash::Device,
    source: &ShaderSource,
) -> Result<vk::ShaderModule, ShaderCompileError> {
    let bytecode = match source {
        ShaderSource::SpirV(bytes) => bytes.clone(),
        ShaderSource::Source { lang, text } => compile_with_external_compiler(*lang, text)?,
    };

    if bytecode.len() > MAX_COMPILED_SHADER_BYTES {
        return Err(ShaderCompileError::TooLarge {
            actual: bytecode.len(),
            cap: MAX_COMPILED_SHADER_BYTES,
        });
    }

    let words: Vec<u32> = bytecode
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { raw_device.create_shader_module(&info, None) }
        .map_err(|err| ShaderCompileError::CompilerFailed(format!("vkCreateShaderModule: {err}")))
}

fn compile_with_external_compiler(lang: ShaderLang, text: &str) -> Result<Vec<u8>, ShaderCompileError> {
    if lang != ShaderLang::Glsl {
        return Err(ShaderCompileError::CompilerFailed(
            "only GLSL source compilation is supported by the external toolchain path".into(),
        ));
    }

    let mut tmp_in = tempfile_with_contents(text)?;
    let out_path = format!("{}.spv", tmp_in.path_str());
    tmp_in.flush_to_disk()?;

    let compilers: &[(&str, &[&str])] = &[
        ("glslc", &["-o"]),
        ("glslangValidator", &["-V", "-o"]),
    ];

    for (program, args) in compilers {
        let mut cmd = Command::new(program);
        cmd.args(*args).arg(&out_path).arg(tmp_in.path_str());
        match cmd.output() {
            Ok(output) if output.status.success() => {
                let bytes = std::fs::read(&out_path)?;
                let _ = std::fs::remove_file(&out_path);
                return Ok(bytes);
            }
            Ok(output) => {
                return Err(ShaderCompileError::CompilerFailed(
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ));
            }
            Err(_) => continue,
        }
    }
    Err(ShaderCompileError::NoCompilerFound)
}

struct TempSource {
    path: std::path::PathBuf,
    contents: String,
}

impl TempSource {
    fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }

    fn flush_to_disk(&mut self) -> Result<(), ShaderCompileError> {
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(self.contents.as_bytes())?;
        Ok(())
    }
}

impl Drop for TempSource {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn tempfile_with_contents(text: &str) -> Result<TempSource, ShaderCompileError> {
    let mut path = std::env::temp_dir();
    path.push(format!("gfx-runtime-shader-{}.glsl", std::process::id()));
    Ok(TempSource {
        path,
        contents: text.to_string(),
    })
}

pub fn destroy_shader_module(raw_device: &ash::Device, module: vk::ShaderModule) {
    unsafe {
        raw_device.destroy_shader_module(module, None);
    }
}

pub fn entry_point() -> &'static std::ffi::CStr {
    c"main"
}
