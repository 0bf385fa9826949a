//! Integration-level page mapper checks exercised through the public
//! crate surface (the exhaustive case-by-case coverage lives in
//! `src/mapper.rs`'s own unit tests).

use hermes_buffer::mapper::map;

#[test]
fn full_coverage_and_ordering_hold_over_many_page_sizes() {
    for &page_size in &[512u32, 4096, 65536, 1024 * 1024] {
        for &(offset, len) in &[(0u64, 10u64), (7, 10_000), (page_size as u64 - 1, 2)] {
            let placements = map(offset, len, page_size).unwrap();
            let total: u64 = placements.iter().map(|p| p.blob_size as u64).sum();
            assert_eq!(total, len);

            let mut expected_off = offset;
            for p in &placements {
                assert_eq!(p.bucket_off, expected_off);
                assert!(p.page_index >= 1);
                expected_off += p.blob_size as u64;
            }
        }
    }
}

#[test]
fn rejects_zero_page_size_and_offset_overflow() {
    assert!(map(0, 10, 0).is_err());
    assert!(map(u64::MAX - 1, 10, 4096).is_err());
}
