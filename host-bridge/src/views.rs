//! Memory View Cache
//!
//! Typed windows over the guest's linear memory. A view is a zero-copy
//! reinterpretation of the memory bytes as `u8`, `i32`, `u32`, `f32` or `f64`
//! elements (little-endian, element-indexed like the guest's own typed
//! arrays).
//!
//! # Invalidation
//!
//! Linear memory may be replaced whenever the guest grows it, so a view is
//! only valid for the epoch it was built in. The cache tracks the buffer
//! size it last observed; any change bumps the epoch and every element kind
//! is rebuilt on its next use. [`MemoryViewCache::invalidate`] forces the
//! same when a new instance is bound.

use crate::error::{BridgeError, BridgeResult};
use crate::wasm_linker::WasmStateCore;
use std::marker::PhantomData;
use tracing::trace;
use wasmtime::AsContextMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    U8 = 0,
    I32 = 1,
    U32 = 2,
    F32 = 3,
    F64 = 4,
}

const VIEW_KINDS: usize = 5;

/// Element type a [`TypedView`] can be built over
pub trait ViewElement: Copy + Default + 'static {
    const KIND: ViewKind;
    const WIDTH: usize;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

macro_rules! view_element {
    ($ty:ty, $kind:ident) => {
        impl ViewElement for $ty {
            const KIND: ViewKind = ViewKind::$kind;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

view_element!(u8, U8);
view_element!(i32, I32);
view_element!(u32, U32);
view_element!(f32, F32);
view_element!(f64, F64);

/// Per-kind view bookkeeping for one guest memory
#[derive(Debug, Default)]
pub struct MemoryViewCache {
    epoch: u64,
    observed_len: usize,
    built: [Option<u64>; VIEW_KINDS],
    rebuilds: u64,
}

impl MemoryViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build (or reuse) the view of kind `T` over the current buffer
    pub fn view<'a, T: ViewElement>(&mut self, bytes: &'a mut [u8]) -> TypedView<'a, T> {
        if bytes.len() != self.observed_len {
            self.epoch += 1;
            trace!(
                "linear memory resized {} -> {} bytes, epoch {}",
                self.observed_len,
                bytes.len(),
                self.epoch
            );
            self.observed_len = bytes.len();
        }

        let stamp = &mut self.built[T::KIND as usize];
        if *stamp != Some(self.epoch) {
            *stamp = Some(self.epoch);
            self.rebuilds += 1;
            trace!("rebuilt {:?} view at epoch {}", T::KIND, self.epoch);
        }

        TypedView {
            bytes,
            epoch: self.epoch,
            _element: PhantomData,
        }
    }

    /// Drop every cached view; the next access rebuilds
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        trace!("memory views invalidated, epoch {}", self.epoch);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total number of view (re)builds since creation
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Whether a view of kind `T` built now would be a rebuild
    pub fn is_stale<T: ViewElement>(&self, current_len: usize) -> bool {
        current_len != self.observed_len || self.built[T::KIND as usize] != Some(self.epoch)
    }
}

/// Element-indexed window over linear memory, valid for one epoch
pub struct TypedView<'a, T: ViewElement> {
    bytes: &'a mut [u8],
    epoch: u64,
    _element: PhantomData<T>,
}

impl<'a, T: ViewElement> TypedView<'a, T> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of whole elements in the view
    pub fn len(&self) -> usize {
        self.bytes.len() / T::WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        let start = index.checked_mul(T::WIDTH)?;
        let end = start.checked_add(T::WIDTH)?;
        self.bytes.get(start..end).map(T::read_le)
    }

    pub fn set(&mut self, index: usize, value: T) -> BridgeResult<()> {
        let range = self.byte_range(index, 1)?;
        value.write_le(&mut self.bytes[range]);
        Ok(())
    }

    /// Copy `count` elements starting at element `start`
    pub fn to_vec(&self, start: usize, count: usize) -> BridgeResult<Vec<T>> {
        let range = self.byte_range(start, count)?;
        Ok(self.bytes[range]
            .chunks_exact(T::WIDTH)
            .map(T::read_le)
            .collect())
    }

    /// Write `values` starting at element `start`
    pub fn write_slice(&mut self, start: usize, values: &[T]) -> BridgeResult<()> {
        let range = self.byte_range(start, values.len())?;
        for (chunk, value) in self.bytes[range].chunks_exact_mut(T::WIDTH).zip(values) {
            value.write_le(chunk);
        }
        Ok(())
    }

    fn byte_range(&self, start: usize, count: usize) -> BridgeResult<std::ops::Range<usize>> {
        let begin = start.checked_mul(T::WIDTH);
        let end = count
            .checked_mul(T::WIDTH)
            .and_then(|n| begin.and_then(|b| b.checked_add(n)));
        match (begin, end) {
            (Some(begin), Some(end)) if end <= self.bytes.len() => Ok(begin..end),
            _ => Err(BridgeError::memory(format!(
                "{:?} view access {}+{} out of bounds ({} elements)",
                T::KIND,
                start,
                count,
                self.len()
            ))),
        }
    }
}

impl<'a> TypedView<'a, u8> {
    /// Borrow raw bytes `[ptr, ptr + len)`
    pub fn bytes(&self, ptr: u32, len: u32) -> BridgeResult<&[u8]> {
        let range = self.byte_range(ptr as usize, len as usize)?;
        Ok(&self.bytes[range])
    }

    pub fn bytes_mut(&mut self, ptr: u32, len: u32) -> BridgeResult<&mut [u8]> {
        let range = self.byte_range(ptr as usize, len as usize)?;
        Ok(&mut self.bytes[range])
    }
}

/// Run `f` against the current view of kind `T` over the bound guest memory
pub fn with_view<S, T, R>(
    mut ctx: impl AsContextMut<Data = S>,
    f: impl FnOnce(&mut TypedView<'_, T>) -> R,
) -> BridgeResult<R>
where
    S: WasmStateCore,
    T: ViewElement,
{
    let memory = ctx.as_context_mut().data().bridge().exports()?.memory;
    let (bytes, state) = memory.data_and_store_mut(&mut ctx);
    let mut view = state.bridge_mut().views.view::<T>(bytes);
    Ok(f(&mut view))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_reuse_within_epoch() {
        let mut cache = MemoryViewCache::new();
        let mut mem = vec![0u8; 64];

        cache.view::<i32>(&mut mem);
        cache.view::<i32>(&mut mem);
        cache.view::<f64>(&mut mem);
        assert_eq!(cache.rebuilds(), 2);
        assert!(!cache.is_stale::<i32>(64));
    }

    #[test]
    fn test_growth_rebuilds_every_kind() {
        let mut cache = MemoryViewCache::new();
        let mut mem = vec![0u8; 64];
        cache.view::<u8>(&mut mem);
        cache.view::<u32>(&mut mem);
        let before = cache.epoch();

        mem.resize(128, 0);
        assert!(cache.is_stale::<u8>(mem.len()));
        let view = cache.view::<u8>(&mut mem);
        assert_eq!(view.len(), 128);
        assert_eq!(view.epoch(), before + 1);
        cache.view::<u32>(&mut mem);
        assert_eq!(cache.rebuilds(), 4);
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let mut cache = MemoryViewCache::new();
        let mut mem = vec![0u8; 16];
        cache.view::<f32>(&mut mem);
        cache.invalidate();
        assert!(cache.is_stale::<f32>(16));
        cache.view::<f32>(&mut mem);
        assert_eq!(cache.rebuilds(), 2);
    }

    #[test]
    fn test_element_indexing_is_little_endian() {
        let mut cache = MemoryViewCache::new();
        let mut mem = vec![0u8; 32];
        {
            let mut view = cache.view::<i32>(&mut mem);
            view.set(1, -2).unwrap();
            view.write_slice(2, &[7, 8]).unwrap();
            assert_eq!(view.get(1), Some(-2));
            assert_eq!(view.to_vec(2, 2).unwrap(), vec![7, 8]);
            assert!(view.set(8, 0).is_err());
            assert_eq!(view.get(8), None);
        }
        assert_eq!(&mem[4..8], &(-2i32).to_le_bytes());

        let mut view = cache.view::<f64>(&mut mem);
        view.set(3, 1.5).unwrap();
        assert_eq!(view.get(3), Some(1.5));
        assert_eq!(view.len(), 4);
    }

    #[test]
    fn test_byte_window_bounds() {
        let mut cache = MemoryViewCache::new();
        let mut mem = b"hello world".to_vec();
        let view = cache.view::<u8>(&mut mem);
        assert_eq!(view.bytes(6, 5).unwrap(), b"world");
        assert!(view.bytes(6, 6).is_err());
        assert!(view.bytes(u32::MAX, 2).is_err());
    }
}
