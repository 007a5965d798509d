use chunkvault_core::backup::BackupTier;
use chunkvault_core::codec;
use chunkvault_core::primary::PrimaryTier;
use chunkvault_core::records::MemoryRecordStore;
use chunkvault_core::{CancelToken, OwnerId, Vault};
use proptest::prelude::*;

fn vault(root: &std::path::Path, chunk_size: usize) -> Vault {
    Vault::with_parts(
        chunk_size,
        PrimaryTier::open(root).unwrap(),
        BackupTier::disabled(),
        Box::new(MemoryRecordStore::new()),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn upload_then_download_is_identity(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..700,
    ) {
        let td = tempfile::tempdir().unwrap();
        let v = vault(td.path(), chunk_size);
        let owner = OwnerId::new("p").unwrap();
        let up = v.upload(&owner, "data.bin", &data[..]).unwrap();
        prop_assert_eq!(up.chunk_count, (data.len() + chunk_size - 1) / chunk_size);
        prop_assert_eq!(up.size, data.len() as u64);
        let back = v.download(&owner, &up.file_id, &CancelToken::new()).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn checksum_does_not_depend_on_chunk_size(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        a in 1usize..300,
        b in 1usize..300,
    ) {
        let sa = codec::split(&data[..], a).unwrap();
        let sb = codec::split(&data[..], b).unwrap();
        prop_assert_eq!(&sa.checksum, &sb.checksum);
        prop_assert_eq!(sa.checksum, codec::checksum(&data));
    }
}
