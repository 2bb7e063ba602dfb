//! Binary checkpointing of arrays.
//!
//! All values are written little-endian. Strings are prefixed by their byte length as `u32`.
//! An array is written as its allocation flag, followed (if allocated) by the element type
//! tag, the dimension count, the sizes and the elements in linear order.
use super::{Element, HeteroArray};
use crate::space::MemorySpace;
use eyre::{bail, eyre, WrapErr};
use std::io::{Read, Write};
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;

/// Values that can be written to and restored from a checkpoint stream.
pub trait DataIo {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()>;

    /// Restores a value in place. Arrays validate the stored shape against their current shape.
    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()>;
}

macro_rules! impl_data_io_le {
    ($($t:ty),*) => {
        $(
            impl DataIo for $t {
                fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
                    writer.write_all(&self.to_le_bytes())?;
                    Ok(())
                }

                fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
                    let mut bytes = [0u8; std::mem::size_of::<$t>()];
                    reader.read_exact(&mut bytes)?;
                    *self = <$t>::from_le_bytes(bytes);
                    Ok(())
                }
            }
        )*
    };
}

impl_data_io_le!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl DataIo for usize {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        (*self as u64).store(writer)
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        let mut value = 0u64;
        value.load(reader)?;
        *self = usize::try_from(value).wrap_err("stored usize does not fit on this platform")?;
        Ok(())
    }
}

impl DataIo for isize {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        (*self as i64).store(writer)
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        let mut value = 0i64;
        value.load(reader)?;
        *self = isize::try_from(value).wrap_err("stored isize does not fit on this platform")?;
        Ok(())
    }
}

impl DataIo for bool {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        (*self as u8).store(writer)
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        let mut value = 0u8;
        value.load(reader)?;
        *self = match value {
            0 => false,
            1 => true,
            other => bail!("invalid boolean byte {} in stream", other),
        };
        Ok(())
    }
}

impl DataIo for String {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        let len = u32::try_from(self.len()).map_err(|_| eyre!("string too long to store"))?;
        len.store(writer)?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        let mut len = 0u32;
        len.load(reader)?;
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        *self = String::from_utf8(bytes).wrap_err("stored string is not valid UTF-8")?;
        Ok(())
    }
}

impl DataIo for [f64; 3] {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        self.iter().try_for_each(|x| x.store(writer))
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        self.iter_mut().try_for_each(|x| x.load(reader))
    }
}

fn format_dims(dims: &[usize]) -> String {
    let dims: Vec<String> = dims.iter().map(ToString::to_string).collect();
    format!("({})", dims.join(", "))
}

impl<T: Element + DataIo, const D: usize> DataIo for HeteroArray<T, D> {
    fn store(&self, writer: &mut dyn Write) -> eyre::Result<()> {
        let is_alloc = self.is_alloc();
        is_alloc.store(writer)?;
        if !is_alloc {
            return Ok(());
        }

        T::type_tag().store(writer)?;
        (D as u32).store(writer)?;
        for dim in self.dims() {
            dim.store(writer)?;
        }

        let size = self.size();
        if self.is_device_alloc() {
            // Device elements are bitwise images: stage them through uninitialized scratch
            // memory so that no destructor runs when the scratch buffer is released.
            let mut scratch: Vec<MaybeUninit<T>> = Vec::with_capacity(size);
            unsafe {
                ptr::copy_nonoverlapping(
                    self.ptr_in(MemorySpace::Device) as *const MaybeUninit<T>,
                    scratch.as_mut_ptr(),
                    size,
                );
                scratch.set_len(size);
            }
            for value in &scratch {
                unsafe { value.assume_init_ref() }.store(writer)?;
            }
        } else if let Some(values) = self.host_slice() {
            for value in values {
                value.store(writer)?;
            }
        }
        Ok(())
    }

    fn load(&mut self, reader: &mut dyn Read) -> eyre::Result<()> {
        let mut is_alloc = false;
        is_alloc.load(reader)?;
        if !is_alloc {
            return Ok(());
        }

        let mut stored_type = String::new();
        stored_type.load(reader)?;
        let expected_type = T::type_tag();
        if stored_type != expected_type {
            bail!(
                "HeteroArray: cannot load array because the stored array is of type '{}' \
                 but the loading array is of type '{}'",
                stored_type,
                expected_type
            );
        }

        let mut stored_dim = 0u32;
        stored_dim.load(reader)?;
        if stored_dim as usize != D {
            bail!(
                "HeteroArray: cannot load array because the stored array is {}D \
                 but the loading array is {}D",
                stored_dim,
                D
            );
        }

        let mut stored_dims = vec![0usize; D];
        for dim in &mut stored_dims {
            dim.load(reader)?;
        }
        if stored_dims.as_slice() != self.dims().as_slice() {
            bail!(
                "HeteroArray: cannot load array because the stored array has dimensions {} \
                 but the loading array has dimensions {}",
                format_dims(&stored_dims),
                format_dims(&self.dims())
            );
        }

        if let Some(values) = self.host_slice_mut() {
            for value in values {
                value.load(reader)?;
            }
            if self.is_device_alloc() {
                self.copy_to_device()?;
            }
        } else if self.is_device_alloc() && T::IS_ARRAY {
            // Nested arrays load into the storage their device images refer to. The images
            // are read bitwise and must not be dropped.
            let device = self.ptr_in(MemorySpace::Device);
            for i in 0..self.size() {
                let mut image = ManuallyDrop::new(unsafe { ptr::read(device.add(i)) });
                image.load(reader)?;
            }
        } else if self.is_device_alloc() {
            let size = self.size();
            let mut staged: Vec<T> = (0..size).map(|_| T::default()).collect();
            for value in &mut staged {
                value.load(reader)?;
            }
            // Ownership of the staged elements moves into the device images
            unsafe {
                ptr::copy_nonoverlapping(staged.as_ptr(), self.ptr_in(MemorySpace::Device), size);
                staged.set_len(0);
            }
        } else {
            bail!("HeteroArray: cannot load array because the loading array has no allocated memory");
        }
        Ok(())
    }
}
