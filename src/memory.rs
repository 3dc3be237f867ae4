use crate::error::OOB_MEMORY_ACCESS;

macro_rules! impl_load_store {
    ($type:ty, $size:literal, $load_name:ident, $store_name:ident) => {
        #[inline(always)]
        pub fn $load_name(&self, ptr: u32, offset: u32) -> Result<$type, &'static str> {
            let addr = (ptr as usize).checked_add(offset as usize).ok_or(OOB_MEMORY_ACCESS)?;
            let end = addr.checked_add($size).ok_or(OOB_MEMORY_ACCESS)?;
            if end > self.data.len() { return Err(OOB_MEMORY_ACCESS); }
            Ok(<$type>::from_le_bytes(self.data[addr..end].try_into().unwrap()))
        }
        #[inline(always)]
        pub fn $store_name(&mut self, ptr: u32, offset: u32, v: $type) -> Result<(), &'static str> {
            let addr = (ptr as usize).checked_add(offset as usize).ok_or(OOB_MEMORY_ACCESS)?;
            let end = addr.checked_add($size).ok_or(OOB_MEMORY_ACCESS)?;
            if end > self.data.len() { return Err(OOB_MEMORY_ACCESS); }
            self.data[addr..end].copy_from_slice(&v.to_le_bytes());
            Ok(())
        }
    };
}

macro_rules! impl_signed_load {
    ($name:ident, $target:ty, $source:ident) => {
        #[inline(always)]
        pub fn $name(&self, ptr: u32, offset: u32) -> Result<$target, &'static str> {
            Ok(self.$source(ptr, offset)? as $target)
        }
    };
}

/// A linear memory sized in 64 KiB pages, plus the module's passive data
/// segments (materialized on demand by MEMORY_INIT).
pub struct LinearMemory {
    data: Vec<u8>,
    current: u32,
    maximum: u32,
    /// Passive segments by index; `None` once dropped by DATA_DROP.
    passive: Vec<Option<Vec<u8>>>,
}

impl LinearMemory {
    pub const MAX_PAGES: u32 = 65536;
    pub const PAGE_SIZE: u32 = 65536;

    pub fn new(initial: u32, maximum: u32) -> Self {
        let maximum = maximum.min(Self::MAX_PAGES);
        let data = vec![0; (initial as usize) * (Self::PAGE_SIZE as usize)];
        Self { data, current: initial, maximum, passive: Vec::new() }
    }

    pub fn size(&self) -> u32 { self.current }
    pub fn max(&self) -> u32 { self.maximum }

    /// Grow by `delta` pages; returns the previous page count, or
    /// `u32::MAX` when the maximum would be exceeded.
    pub fn grow(&mut self, delta: u32) -> u32 {
        if delta == 0 { return self.current; }
        if delta > self.maximum.saturating_sub(self.current) { return u32::MAX; }
        let old = self.current;
        self.current += delta;
        self.data.resize((self.current as usize) * (Self::PAGE_SIZE as usize), 0);
        old
    }

    impl_load_store!(u8,  1, load_u8, store_u8);    impl_load_store!(u16, 2, load_u16, store_u16);
    impl_load_store!(u32, 4, load_u32, store_u32);  impl_load_store!(u64, 8, load_u64, store_u64);
    impl_signed_load!(load_i8,  i8,  load_u8);      impl_signed_load!(load_i16, i16, load_u16);
    impl_signed_load!(load_i32, i32, load_u32);     impl_signed_load!(load_i64, i64, load_u64);

    #[inline(always)]
    pub fn load_f32(&self, ptr: u32, offset: u32) -> Result<f32, &'static str> {
        Ok(f32::from_bits(self.load_u32(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f32(&mut self, ptr: u32, offset: u32, v: f32) -> Result<(), &'static str> {
        self.store_u32(ptr, offset, v.to_bits())
    }
    #[inline(always)]
    pub fn load_f64(&self, ptr: u32, offset: u32) -> Result<f64, &'static str> {
        Ok(f64::from_bits(self.load_u64(ptr, offset)?))
    }
    #[inline(always)]
    pub fn store_f64(&mut self, ptr: u32, offset: u32, v: f64) -> Result<(), &'static str> {
        self.store_u64(ptr, offset, v.to_bits())
    }

    #[inline(always)]
    pub fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), &'static str> {
        let start = offset as usize;
        let end = start.checked_add(bytes.len()).ok_or(OOB_MEMORY_ACCESS)?;
        if end > self.data.len() { return Err(OOB_MEMORY_ACCESS); }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// MEMORY_COPY: overlapping ranges are allowed.
    pub fn copy(&mut self, dst: u32, src: u32, n: u32) -> Result<(), &'static str> {
        let dst = dst as usize;
        let src = src as usize;
        let n = n as usize;
        let dst_end = dst.checked_add(n).ok_or(OOB_MEMORY_ACCESS)?;
        let src_end = src.checked_add(n).ok_or(OOB_MEMORY_ACCESS)?;
        if dst_end > self.data.len() || src_end > self.data.len() {
            return Err(OOB_MEMORY_ACCESS);
        }
        self.data.copy_within(src..src_end, dst);
        Ok(())
    }

    /// Register a passive data segment; returns its index.
    pub fn add_passive_segment(&mut self, bytes: Vec<u8>) -> u32 {
        self.passive.push(Some(bytes));
        (self.passive.len() - 1) as u32
    }

    /// MEMORY_INIT: copy `[offset, offset+n)` of passive segment `seg` to
    /// `dst`. A dropped or unknown segment behaves as zero-length, so any
    /// non-degenerate access to it is out of bounds.
    pub fn init_passive_segment(&mut self, seg: u32, dst: u32, offset: u32, n: u32) -> Result<(), &'static str> {
        let src: &[u8] = match self.passive.get(seg as usize) {
            Some(Some(bytes)) => bytes,
            Some(None) | None => &[],
        };
        let start = offset as usize;
        let end = start.checked_add(n as usize).ok_or(OOB_MEMORY_ACCESS)?;
        if end > src.len() { return Err(OOB_MEMORY_ACCESS); }
        let chunk = src[start..end].to_vec();
        self.write_bytes(dst, &chunk)
    }

    /// DATA_DROP: the segment's contents are discarded and later
    /// MEMORY_INIT calls against it trap.
    pub fn drop_segment(&mut self, seg: u32) {
        if let Some(slot) = self.passive.get_mut(seg as usize) {
            *slot = None;
        }
    }
}
