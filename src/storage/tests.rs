#[cfg(test)]
mod tests {
    use crate::storage::backend::{Backend, FileBackend, MemBackend};
    use crate::storage::engine::{create, CommitHook, NopHook, Storage, StorageError};
    use crate::storage::format::{CHUNK_HEADER_SIZE, STORE_HEADER_SIZE};

    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const VERY_SHORT_DATA: &[u8] = b"hello world";

    const SHORT_DATA: &[u8] = b"A storage file never changes shape once it exists. The creation \
tool decides how many chunks there are and how large each one is, and every later writer and \
reader navigates by that geometry alone. Payloads that fit a single chunk occupy exactly one; \
anything larger spills into the following chunks, each header pointing at the next, until the \
final chunk closes the chain. Nothing is ever moved afterwards, which keeps the reader logic \
pleasantly dull.";

    const LONG_DATA: &[u8] = b"Append-mostly systems trade flexibility for a very short list of \
invariants, and that list is what makes them easy to reason about under failure. A record, once \
acknowledged, sits at a fixed position forever; the only mutable word in the whole file is the \
pointer that says where the next record will begin. If the process dies halfway through laying \
down chunks, the pointer still names the old frontier, so the half-written bytes are invisible \
garbage that the next writer paves over without ever knowing they were there.\n\
Replication rides on the same trick. The master lays down the chunks, asks its replica to accept \
the identical bytes at the identical position, and only moves the frontier pointer once the \
replica has said yes. A reader that observes a record on the master can therefore assume the \
replica holds it too, which is the entire consistency story in one sentence. There are no logs \
to replay, no epochs to compare, and no reconciliation pass after a restart.\n\
The price is density. Compression claws some of it back: each payload is squeezed before it is \
written, and kept compressed only when that actually saves room, so incompressible inputs do not \
pay the header tax twice. Small payloads stay raw because the gzip framing alone would outweigh \
them. The flag travels with every chunk of the record, and the reader trusts the flag it saw \
last, which for a well-formed chain is the terminal chunk's copy of the same value.\n\
None of this is novel, and that is the point. The format is small enough to audit in an \
afternoon, the failure modes are enumerable, and the recovery procedure is to do nothing at all.";

    fn gzipped_len(data: &[u8]) -> usize {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap().len()
    }

    /// Chunks a committed record of `data` occupies in a store with 512-byte
    /// chunk payloads, under the gzip-if-smaller policy.
    fn expected_chunks(data: &[u8]) -> usize {
        let stored = data.len().min(gzipped_len(data));
        stored.div_ceil(512)
    }

    struct RecordingHook {
        calls: Mutex<Vec<usize>>,
    }

    impl RecordingHook {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommitHook for RecordingHook {
        async fn commit(&self, start_idx: usize) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(start_idx);
            Ok(())
        }
    }

    /// Fails every commit after the first `succeed` invocations.
    struct FlakyHook {
        succeed: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl CommitHook for FlakyHook {
        async fn commit(&self, _start_idx: usize) -> anyhow::Result<()> {
            if self.seen.fetch_add(1, Ordering::SeqCst) < self.succeed {
                Ok(())
            } else {
                Err(anyhow::anyhow!("replication failed"))
            }
        }
    }

    fn new_store(storage_id: u64) -> Storage<MemBackend> {
        let mut mb = MemBackend::new();
        create(&mut mb, 512, 512, storage_id).unwrap();
        Storage::open(mb).unwrap()
    }

    // ============================================================
    // CREATION & GEOMETRY
    // ============================================================

    #[test]
    fn test_create_file_layout() {
        let mut mb = MemBackend::new();
        create(&mut mb, 512, 512, 0).unwrap();

        let expected_len = STORE_HEADER_SIZE + 512 * (CHUNK_HEADER_SIZE + 512);
        assert_eq!(expected_len, 278552);
        assert_eq!(mb.len(), expected_len);
    }

    #[tokio::test]
    async fn test_create_assigns_random_nonzero_id() {
        let st = new_store(0);
        assert_ne!(st.id(), 0, "zero storage id must be randomized");
        assert_eq!(st.free_chunk_idx().await, 0);
    }

    #[tokio::test]
    async fn test_open_preserves_geometry() {
        let st = new_store(104);
        assert_eq!(st.id(), 104);
        assert_eq!(st.chunk_size(), 512 + CHUNK_HEADER_SIZE);
        assert_eq!(st.chunk_data_size(), 512);
        assert_eq!(st.num_chunks(), 512);
        assert!(!st.is_full().await);
    }

    #[tokio::test]
    async fn test_open_rejects_version_mismatch() {
        let mut mb = MemBackend::new();
        create(&mut mb, 512, 16, 104).unwrap();
        // version field sits at bytes 8..12 of the store header
        mb.write_at(&2i32.to_le_bytes(), 8).unwrap();

        match Storage::open(mb) {
            Err(StorageError::VersionMismatch { found, expected }) => {
                assert_eq!(found, 2);
                assert_eq!(expected, 1);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    // ============================================================
    // WRITE / READ ROUND-TRIPS
    // ============================================================

    #[tokio::test]
    async fn test_store_and_read() {
        let st = new_store(0);

        let i = st.write(SHORT_DATA, &NopHook).await.unwrap();
        assert_eq!(i, 0, "first write must start at chunk 0");
        assert_eq!(st.free_chunk_idx().await, expected_chunks(SHORT_DATA));

        let j = st.write(LONG_DATA, &NopHook).await.unwrap();
        assert_eq!(j, expected_chunks(SHORT_DATA));
        assert_eq!(
            st.free_chunk_idx().await,
            expected_chunks(SHORT_DATA) + expected_chunks(LONG_DATA)
        );
        assert!(
            expected_chunks(LONG_DATA) > 1,
            "long record must span several chunks"
        );

        assert_eq!(st.read(i).await.unwrap(), SHORT_DATA);
        assert_eq!(st.read(j).await.unwrap(), LONG_DATA);
    }

    #[tokio::test]
    async fn test_read_out_of_bounds() {
        let st = new_store(0);
        st.write(VERY_SHORT_DATA, &NopHook).await.unwrap();

        let free = st.free_chunk_idx().await;
        for k in 0..3 {
            match st.read(free + k).await {
                Err(StorageError::IndexOutOfBounds) => {}
                other => panic!(
                    "reading at position {} should be out of bounds, got {:?}",
                    free + k,
                    other
                ),
            }
        }
    }

    #[tokio::test]
    async fn test_very_short_data_stays_uncompressed() {
        let st = new_store(104);
        st.write(VERY_SHORT_DATA, &NopHook).await.unwrap();

        let (raw, chunk_count, compressed) = st.read_raw(0).await.unwrap();
        assert_eq!(chunk_count, 1);
        assert!(!compressed, "gzip framing must not be paid for tiny data");
        assert_eq!(raw, VERY_SHORT_DATA);
    }

    #[tokio::test]
    async fn test_compressible_data_is_stored_gzipped() {
        let st = new_store(0);
        st.write(LONG_DATA, &NopHook).await.unwrap();

        let (raw, chunk_count, compressed) = st.read_raw(0).await.unwrap();
        assert!(compressed);
        assert_eq!(raw.len(), gzipped_len(LONG_DATA));
        assert_eq!(chunk_count, expected_chunks(LONG_DATA));
        assert_eq!(st.read(0).await.unwrap(), LONG_DATA);
    }

    #[tokio::test]
    async fn test_incompressible_write_fills_storage() {
        let mut mb = MemBackend::new();
        create(&mut mb, 512, 2, 0).unwrap();
        let st = Storage::open(mb).unwrap();

        let noise: Vec<u8> = (0..2048).map(|_| rand::random()).collect();
        match st.write(&noise, &NopHook).await {
            Err(StorageError::Full) => {}
            other => panic!("expected storage full, got {:?}", other),
        }
        assert_eq!(
            st.free_chunk_idx().await,
            0,
            "failed write must not advance the free pointer"
        );
    }

    // ============================================================
    // COMMIT HOOK PROTOCOL
    // ============================================================

    #[tokio::test]
    async fn test_commit_hook_receives_start_index() {
        let st = new_store(104);

        let hook = RecordingHook::new();
        let i = st.write(SHORT_DATA, &hook).await.unwrap();
        assert_eq!(i, 0);
        assert_eq!(*hook.calls.lock().unwrap(), vec![0]);

        let j = st.write(LONG_DATA, &hook).await.unwrap();
        assert_eq!(*hook.calls.lock().unwrap(), vec![0, j]);
    }

    #[tokio::test]
    async fn test_failed_commit_aborts_write() {
        let st = new_store(104);
        let hook = FlakyHook {
            succeed: 1,
            seen: AtomicUsize::new(0),
        };

        let i = st.write(VERY_SHORT_DATA, &hook).await.unwrap();
        assert_eq!(i, 0);
        assert_eq!(st.free_chunk_idx().await, 1);

        // second write: chunks hit the backend but the commit is refused
        match st.write(SHORT_DATA, &hook).await {
            Err(StorageError::Replication(_)) => {}
            other => panic!("expected replication error, got {:?}", other),
        }
        assert_eq!(st.free_chunk_idx().await, 1);

        // the aborted record is not readable...
        match st.read(1).await {
            Err(StorageError::IndexOutOfBounds) => {}
            other => panic!("aborted write must stay invisible, got {:?}", other),
        }

        // ...and the next successful write reclaims the same index
        let k = st.write(SHORT_DATA, &NopHook).await.unwrap();
        assert_eq!(k, 1);
        assert_eq!(st.read(1).await.unwrap(), SHORT_DATA);
    }

    // ============================================================
    // WRITE_TO & THE FREE POINTER
    // ============================================================

    #[tokio::test]
    async fn test_write_to_at_dictated_index() {
        let st = new_store(104);

        let idx = st.write_to(SHORT_DATA, 0, &NopHook).await.unwrap();
        assert_eq!(idx, 0);
        assert_eq!(st.free_chunk_idx().await, 1);

        let idx = st.write_to(LONG_DATA, 1, &NopHook).await.unwrap();
        assert_eq!(idx, 1);
        assert_eq!(st.free_chunk_idx().await, 1 + expected_chunks(LONG_DATA));
        assert_eq!(st.read(1).await.unwrap(), LONG_DATA);
    }

    #[tokio::test]
    async fn test_write_to_lower_index_rewinds_free_pointer() {
        let st = new_store(104);

        st.write(SHORT_DATA, &NopHook).await.unwrap();
        st.write(LONG_DATA, &NopHook).await.unwrap();
        let free_before = st.free_chunk_idx().await;
        assert!(free_before > 1);

        // overwriting chunk 0 moves the free pointer back to the end of the
        // new record; records behind the old pointer are abandoned
        st.write_to(VERY_SHORT_DATA, 0, &NopHook).await.unwrap();
        assert_eq!(st.free_chunk_idx().await, 1);
        assert_eq!(st.read(0).await.unwrap(), VERY_SHORT_DATA);
    }

    // ============================================================
    // ITERATION
    // ============================================================

    #[tokio::test]
    async fn test_iter_enumerates_every_record_once() {
        let st = new_store(0);

        let payloads: [&[u8]; 3] = [SHORT_DATA, VERY_SHORT_DATA, LONG_DATA];
        let mut written = Vec::new();
        for payload in payloads {
            written.push(st.write(payload, &NopHook).await.unwrap());
        }

        let seen = Mutex::new(Vec::new());
        st.iter(|idx, data| {
            seen.lock().unwrap().push((idx, data));
            async { Ok(()) }
        })
        .await
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), payloads.len());
        for (n, (idx, data)) in seen.iter().enumerate() {
            assert_eq!(*idx, written[n], "record {} starts at the wrong chunk", n);
            assert_eq!(data.as_slice(), payloads[n]);
        }
    }

    #[tokio::test]
    async fn test_iter_on_empty_storage() {
        let st = new_store(0);
        let mut count = 0;
        st.iter(|_, _| {
            count += 1;
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_iter_callback_error_stops_iteration() {
        let st = new_store(0);
        st.write(SHORT_DATA, &NopHook).await.unwrap();
        st.write(LONG_DATA, &NopHook).await.unwrap();

        let mut calls = 0;
        let result = st
            .iter(|_, _| {
                calls += 1;
                async { Err(anyhow::anyhow!("stop here")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    // ============================================================
    // FULLNESS
    // ============================================================

    #[tokio::test]
    async fn test_is_full_after_last_chunk() {
        let mut mb = MemBackend::new();
        create(&mut mb, 512, 1, 0).unwrap();
        let st = Storage::open(mb).unwrap();

        assert!(!st.is_full().await);
        st.write(VERY_SHORT_DATA, &NopHook).await.unwrap();
        assert!(st.is_full().await);

        match st.write(VERY_SHORT_DATA, &NopHook).await {
            Err(StorageError::Full) => {}
            other => panic!("expected storage full, got {:?}", other),
        }
    }

    // ============================================================
    // FILE BACKEND
    // ============================================================

    #[tokio::test]
    async fn test_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bs");

        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let mut backend = FileBackend::new(file);
        create(&mut backend, 512, 64, 104).unwrap();

        let idx = {
            let st = Storage::open(backend).unwrap();
            let idx = st.write(LONG_DATA, &NopHook).await.unwrap();
            assert_eq!(st.read(idx).await.unwrap(), LONG_DATA);
            idx
        };

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let st = Storage::open(FileBackend::new(file)).unwrap();
        assert_eq!(st.id(), 104);
        assert_eq!(st.free_chunk_idx().await, idx + expected_chunks(LONG_DATA));
        assert_eq!(st.read(idx).await.unwrap(), LONG_DATA);
    }
}
