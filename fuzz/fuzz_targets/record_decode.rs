#![no_main]

use auditlog_core::{AuditRecord, RecordHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; errors are fine.
    let _ = RecordHeader::decode(data);

    if let Ok(record) = AuditRecord::decode(data) {
        // Whatever decodes must survive a re-encode cycle.
        let reencoded = record.encode();
        AuditRecord::decode(&reencoded).expect("re-encoded record failed to decode");
    }
});
