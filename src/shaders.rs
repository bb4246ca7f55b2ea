use std::path::Path;

use crate::{error::ShaderError, pipeline::PipelineDevice};

use vulkanalia::prelude::v1_0::*;

/// Reads a compiled SPIR-V binary into 32-bit words. Empty files
/// and files whose length is not a multiple of 4 are rejected
/// rather than truncated.
pub fn read_shader_code(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    decode_shader_code(path, &bytes)
}

fn decode_shader_code(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() {
        return Err(ShaderError::Empty { path: path.to_path_buf() });
    }

    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Misaligned {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }

    // Copying into words also takes care of the alignment the
    // byte buffer does not guarantee.
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Loads a shader binary and wraps it in a shader module. A
/// failure here is recoverable: the caller decides whether it can
/// do without the module.
pub fn load_shader_module<D: PipelineDevice>(
    device: &D,
    path: &Path,
) -> Result<vk::ShaderModule, ShaderError> {
    let code = read_shader_code(path)?;

    device
        .create_module(&code)
        .map_err(|code| ShaderError::Create {
            path: path.to_path_buf(),
            code,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("trigon-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn reads_words_in_native_order() {
        let words = [0x0723_0203u32, 0x0001_0000, 42];
        let bytes = words.iter().flat_map(|w| w.to_ne_bytes()).collect::<Vec<_>>();
        let path = temp_file("words.spv", &bytes);

        assert_eq!(read_shader_code(&path).unwrap(), words);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn zero_length_binary_is_a_load_failure() {
        let path = temp_file("empty.spv", &[]);

        let error = read_shader_code(&path).unwrap_err();
        assert!(matches!(error, ShaderError::Empty { .. }));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn partial_words_are_rejected() {
        let error = decode_shader_code(Path::new("odd.spv"), &[1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(matches!(error, ShaderError::Misaligned { len: 6, .. }));
    }

    #[test]
    fn missing_file_is_an_io_failure() {
        let error = read_shader_code(Path::new("/nonexistent/trigon/shader.spv")).unwrap_err();
        assert!(matches!(error, ShaderError::Io { .. }));
    }
}
