//! Writes `torch.save`-format archives of float tensors for loader tests
//!
//! Layout matches PyTorch's zip serialization: `archive/data.pkl` holds a
//! protocol 2 pickle of the mapping, and each tensor's little-endian storage
//! lives in `archive/data/<index>`.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use zip::{result::ZipResult, write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// One float tensor: name, shape, contiguous values
pub type NamedTensor = (String, Vec<usize>, Vec<f32>);

#[derive(Default)]
struct Pickle(Vec<u8>);

impl Pickle {
    fn op(&mut self, code: u8) -> &mut Self {
        self.0.push(code);
        self
    }

    fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.op(b'c');
        self.0.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
        self
    }

    fn unicode(&mut self, value: &str) -> &mut Self {
        self.op(b'X');
        self.0.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.0.extend_from_slice(value.as_bytes());
        self
    }

    fn int(&mut self, value: usize) -> &mut Self {
        self.op(b'J');
        self.0.extend_from_slice(&(value as i32).to_le_bytes());
        self
    }

    fn int_tuple(&mut self, values: &[usize]) -> &mut Self {
        self.op(b'(');
        for &value in values {
            self.int(value);
        }
        self.op(b't')
    }

    /// `torch._utils._rebuild_tensor_v2(storage, 0, size, stride, False, {})`
    fn tensor(&mut self, storage_key: usize, shape: &[usize]) -> &mut Self {
        let numel = shape.iter().product();
        let mut stride = vec![1; shape.len()];
        for dim in (0..shape.len().saturating_sub(1)).rev() {
            stride[dim] = stride[dim + 1] * shape[dim + 1];
        }

        self.global("torch._utils", "_rebuild_tensor_v2").op(b'(');

        // Persistent id: ('storage', torch.FloatStorage, key, 'cpu', numel)
        self.op(b'(')
            .unicode("storage")
            .global("torch", "FloatStorage")
            .unicode(&storage_key.to_string())
            .unicode("cpu")
            .int(numel)
            .op(b't')
            .op(b'Q');

        self.int(0)
            .int_tuple(shape)
            .int_tuple(&stride)
            .op(0x89)
            .op(b'}')
            .op(b't')
            .op(b'R')
    }

    fn state_dict(&mut self, tensors: &[NamedTensor]) -> &mut Self {
        self.op(b'}').op(b'(');
        for (index, (name, shape, _)) in tensors.iter().enumerate() {
            self.unicode(name).tensor(index, shape);
        }
        self.op(b'u')
    }
}

/// Write `tensors` as a state dict, optionally nested one level under `top_level_key`
pub fn write(path: &Path, tensors: &[NamedTensor], top_level_key: Option<&str>) -> ZipResult<()> {
    let mut pickle = Pickle::default();
    pickle.op(0x80).op(2);
    match top_level_key {
        Some(key) => {
            pickle.op(b'}').op(b'(').unicode(key).state_dict(tensors).op(b'u');
        }
        None => {
            pickle.state_dict(tensors);
        }
    }
    pickle.op(b'.');

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(File::create(path)?);

    zip.start_file("archive/data.pkl", options)?;
    zip.write_all(&pickle.0)?;

    for (index, (_, shape, values)) in tensors.iter().enumerate() {
        assert_eq!(shape.iter().product::<usize>(), values.len());
        zip.start_file(format!("archive/data/{index}"), options)?;
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        zip.write_all(&bytes)?;
    }

    zip.start_file("archive/version", options)?;
    zip.write_all(b"3\n")?;

    zip.finish()?;
    Ok(())
}
