#[cfg(test)]
mod tests {
    use crate::wal::{
        Appender, MAX_RECORD_SIZE, WalError, WalHead, body_cksum, read_tail_record,
        segment_file_name,
    };
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_head_layout_round_trip() {
        let head = WalHead {
            version: 0x0102_0304_0506_0708,
            len: 77,
            cksum: 0xAABB_CCDD,
        };
        assert_eq!(WalHead::decode(&head.encode()), head);
        assert!(!head.is_sentinel());
    }

    #[test]
    fn test_sentinel_is_all_zero_bytes() {
        assert_eq!(WalHead::SENTINEL.encode(), [0u8; WalHead::WIRE_SIZE]);
        assert!(WalHead::SENTINEL.is_sentinel());
        assert!(WalHead::decode(&[0u8; WalHead::WIRE_SIZE]).is_sentinel());
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(1), "wal-000001.log");
        assert_eq!(segment_file_name(1_234_567), "wal-1234567.log");
    }

    #[test]
    fn test_append_then_read_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(segment_file_name(1));

        let mut appender = Appender::open(&path).unwrap();
        let bodies: Vec<Vec<u8>> = (1u8..=5).map(|v| vec![v; v as usize * 3]).collect();
        for (i, body) in bodies.iter().enumerate() {
            appender.append(i as u64 + 1, body).unwrap();
        }
        appender.sync().unwrap();

        let mut file = File::open(&path).unwrap();
        for (i, body) in bodies.iter().enumerate() {
            let record = read_tail_record(&mut file).unwrap().unwrap();
            assert_eq!(record.head.version, i as u64 + 1);
            assert_eq!(&record.body, body);
            assert_eq!(record.head.cksum, body_cksum(body));
        }
        assert!(read_tail_record(&mut file).unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_oversized_body() {
        let tmp = TempDir::new().unwrap();
        let mut appender = Appender::open(tmp.path().join(segment_file_name(1))).unwrap();

        let body = vec![0u8; MAX_RECORD_SIZE as usize + 1];
        let err = appender.append(1, &body).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge(_)));
    }

    #[test]
    fn test_appender_reports_size() {
        let tmp = TempDir::new().unwrap();
        let mut appender = Appender::open(tmp.path().join(segment_file_name(2))).unwrap();

        appender.append(1, b"abcdef").unwrap();
        assert_eq!(
            appender.size().unwrap(),
            WalHead::WIRE_SIZE as u64 + 6
        );
    }
}
