#![no_main]

use auditlog_collector::PipeDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary pipe bytes must never panic or stall the decoder.
    let mut decoder = PipeDecoder::new();
    let mut out = Vec::new();
    let mut fed = 0;
    while fed < data.len() {
        let spare = decoder.spare_capacity();
        assert!(!spare.is_empty(), "decoder stopped making progress");
        let take = spare.len().min(data.len() - fed);
        spare[..take].copy_from_slice(&data[fed..fed + take]);
        decoder.commit(take, &mut out);
        fed += take;
    }
    decoder.flush(&mut out);
});
