#[cfg(target_arch = "wasm32")]
pub(crate) fn now_ms() -> i64 {
    js_sys::Date::now().round() as i64
}

/// `ceil(total / size)`, zero when `size == 0`.
pub(crate) fn page_count(total_elements: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let size = u64::from(page_size);
    u32::try_from(total_elements.div_ceil(size)).unwrap_or(u32::MAX)
}
