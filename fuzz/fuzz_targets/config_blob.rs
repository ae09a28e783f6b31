#![no_main]

use fiq_screens::widget::{unwrap_config_blob, WidgetConfig, WidgetKind};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

const KINDS: [WidgetKind; 4] = [
    WidgetKind::Tag,
    WidgetKind::Chart,
    WidgetKind::Table,
    WidgetKind::Analytic,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let text = String::from_utf8_lossy(rest);
    let kind = KINDS[usize::from(selector) % KINDS.len()];

    // Column content arrives both as parsed JSON and as raw text.
    let candidates = [
        serde_json::from_str::<Value>(&text).unwrap_or(Value::Null),
        Value::String(text.into_owned()),
    ];
    for raw in &candidates {
        let _ = unwrap_config_blob(raw);
        let (config, style) = WidgetConfig::decode(kind, raw);
        assert_eq!(config.kind(), kind);
        if kind != WidgetKind::Tag {
            assert!(style.is_none());
        }
        let encoded = config.encode(style.as_ref());
        let (again, style_again) = WidgetConfig::decode(kind, &encoded);
        assert_eq!(again.kind(), kind);
        assert_eq!(style_again, style);
    }
});
