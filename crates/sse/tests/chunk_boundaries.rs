use proptest::prelude::*;
use sse::EventStreamDecoder;

fn value_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z0-9 ]{0,12}").expect("value regex")
}

fn line_break_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("\n"), Just("\r\n"), Just("\r")]
}

fn build_payload(records: &[(String, String)], line_break: &str) -> String {
    let mut payload = String::new();
    for (id, data) in records {
        payload.push_str("id: ");
        payload.push_str(id);
        payload.push_str(line_break);
        payload.push_str("data: ");
        payload.push_str(data);
        payload.push_str(line_break);
        payload.push_str(line_break);
    }
    payload
}

proptest! {
    #[test]
    fn decoding_is_independent_of_chunk_boundaries(
        records in proptest::collection::vec((value_strategy(), value_strategy()), 1..6),
        line_break in line_break_strategy(),
        splits in proptest::collection::vec(0_usize..512, 0..6),
    ) {
        let payload = build_payload(&records, line_break);
        let bytes = payload.as_bytes();

        let whole = EventStreamDecoder::new().push(bytes);

        let mut cuts: Vec<usize> = splits.into_iter().map(|s| s.min(bytes.len())).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut decoder = EventStreamDecoder::new();
        let mut chunked = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunked.extend(decoder.push(&bytes[start..cut]));
            start = cut;
        }
        chunked.extend(decoder.push(&bytes[start..]));

        prop_assert_eq!(&whole, &chunked);
        prop_assert_eq!(whole.len(), records.len());
        prop_assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn retry_only_records_never_surface(
        retry in 0_u64..100_000,
        split in 0_usize..64,
    ) {
        let payload = format!("retry: {retry}\n\n");
        let bytes = payload.as_bytes();
        let split_at = split.min(bytes.len());

        let mut decoder = EventStreamDecoder::new();
        let mut events = decoder.push(&bytes[..split_at]);
        events.extend(decoder.push(&bytes[split_at..]));

        prop_assert!(events.is_empty());
        prop_assert_eq!(decoder.retry(), Some(retry));
    }
}
