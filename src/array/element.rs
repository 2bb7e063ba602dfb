use std::any::type_name;

/// Types that can be stored in a [`HeteroArray`](crate::array::HeteroArray).
///
/// Device memory holds bitwise images of elements and never runs their destructors, so
/// elements owning resources (such as nested arrays) stay owned by the host side.
pub trait Element: Default + Clone + Send + Sync + 'static {
    /// Whether cloning an array of this element type duplicates its contents
    /// instead of sharing them.
    const DEEP_COPY: bool = false;

    /// Whether the element is itself an array handle.
    const IS_ARRAY: bool = false;

    /// A tag identifying the element type in checkpoints.
    fn type_tag() -> String {
        type_name::<Self>().to_string()
    }

    /// Brings any nested device data up to date before the element itself is copied to the
    /// device. A no-op for plain data.
    fn copy_to_device_nested(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

macro_rules! impl_plain_element {
    ($($t:ty),*) => {
        $(impl Element for $t {})*
    };
}

impl_plain_element!(bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, [f64; 3]);
