use bucket_ingest::dispatch::{route, HandlerKind};

#[test]
fn csv_suffix_routes_to_warehouse_in_any_case() {
    for key in ["import/jan.csv", "data/report.CSV", "x.Csv", ".csv", "a/b/c/d.cSv"] {
        assert_eq!(route(key), HandlerKind::CsvBatch, "key {key}");
    }
}

#[test]
fn everything_else_routes_to_document_store() {
    for key in [
        "records/2024-01-01.json",
        "uploads/file",
        "u/42.json",
        "report.csv.json",
        "csv",
        "notes.tsv",
        "",
        "ñ",
    ] {
        assert_eq!(route(key), HandlerKind::JsonRecord, "key {key:?}");
    }
}

#[test]
fn multibyte_keys_do_not_panic() {
    assert_eq!(route("données/été.csv"), HandlerKind::CsvBatch);
    assert_eq!(route("日本"), HandlerKind::JsonRecord);
}
