#![no_main]

use arbitrary::Arbitrary;
use gguf_split::{SplitConfig, parse_split_size};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct ConfigInput {
    size: String,
    raw_toml: Vec<u8>,
}

fuzz_target!(|input: ConfigInput| {
    if input.size.len() > 64 || input.raw_toml.len() > 4096 {
        return;
    }

    if let Ok(bytes) = parse_split_size(&input.size) {
        assert!(bytes > 0);
        assert_eq!(bytes % (1024 * 1024), 0);
    }

    if let Ok(s) = std::str::from_utf8(&input.raw_toml)
        && let Ok(config) = toml::from_str::<SplitConfig>(s)
    {
        let _ = config.policy();
    }
});
