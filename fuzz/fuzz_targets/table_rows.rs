#![no_main]

use fiq_screens::fetch::table::{column_key, pivot, TIME_COLUMN};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value};

const COLUMNS: [&str; 3] = ["Line1__Flow", "Pump", "Level"];

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let Ok(rows) = serde_json::from_str::<Vec<Map<String, Value>>>(&text) else {
        return;
    };
    let table = pivot(&rows, &COLUMNS);
    for (index, tag) in COLUMNS.iter().enumerate() {
        assert_eq!(table.columns().get(tag), Some(index));
    }
    for row in table.rows() {
        assert!(row.contains_key(TIME_COLUMN));
        for key in row.keys().filter(|key| key.as_str() != TIME_COLUMN) {
            assert!(key.starts_with("c_"), "unexpected key {key}");
        }
    }
    let _ = column_key(table.columns().len());
});
