//! Concurrency properties: disjoint-page writes from separate threads
//! land independently, and same-range writes from separate threads never
//! tear (the final bytes equal one writer's value in full, never a mix).

use std::sync::Arc;
use std::thread;

use hermes_buffer::adapter::PosixFacade;
use hermes_buffer::config::Config;
use hermes_buffer::types::OpenFlags;

#[test]
fn disjoint_page_writes_from_two_threads_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disjoint.bin");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    let mut config = Config::default();
    config.page_size = 1024;
    let facade = Arc::new(PosixFacade::new(config));
    let path_str = path.to_str().unwrap().to_string();

    let handles: Vec<_> = (0..4u8)
        .map(|page| {
            let facade = facade.clone();
            let path_str = path_str.clone();
            thread::spawn(move || {
                let id = facade.open(&path_str, OpenFlags::read_write()).unwrap();
                let offset = page as u64 * 1024;
                facade.pwrite(id, offset, &vec![page; 1024]).unwrap();
                facade.close(id).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let id = facade.open(&path_str, OpenFlags::read_only()).unwrap();
    let mut out = vec![0u8; 4096];
    facade.read(id, &mut out).unwrap();
    facade.close(id).unwrap();

    for page in 0..4u8 {
        let slice = &out[page as usize * 1024..(page as usize + 1) * 1024];
        assert!(slice.iter().all(|&b| b == page));
    }
}

#[test]
fn same_range_writes_from_two_threads_never_tear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.bin");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    let mut config = Config::default();
    config.page_size = 4096;
    let facade = Arc::new(PosixFacade::new(config));
    let path_str = path.to_str().unwrap().to_string();

    let values = [0xAAu8, 0xBBu8];
    let handles: Vec<_> = values
        .iter()
        .copied()
        .map(|value| {
            let facade = facade.clone();
            let path_str = path_str.clone();
            thread::spawn(move || {
                let id = facade.open(&path_str, OpenFlags::read_write()).unwrap();
                facade.pwrite(id, 0, &vec![value; 4096]).unwrap();
                facade.close(id).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let id = facade.open(&path_str, OpenFlags::read_only()).unwrap();
    let mut out = vec![0u8; 4096];
    facade.read(id, &mut out).unwrap();
    facade.close(id).unwrap();

    assert!(out.iter().all(|&b| b == values[0]) || out.iter().all(|&b| b == values[1]));
}
