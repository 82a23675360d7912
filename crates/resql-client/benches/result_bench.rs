use criterion::{criterion_group, criterion_main, Criterion};
use resql_client::ResultStream;
use resql_core::Value;
use resql_protocol::backend::{decode_client_response, ResponseWriter};
use resql_protocol::buffer::{CursorBuffer, Reader};

fn decode_rows_bench(c: &mut Criterion) {
    let mut buf = CursorBuffer::new();
    let mut writer = ResponseWriter::begin(&mut buf).expect("begin");
    writer.begin_result_set(0, 0).expect("set");
    writer.columns(&["key", "value", "payload"]).expect("columns");
    for i in 0..1000 {
        writer
            .row(&[
                Value::Text(format!("user:{i}")),
                Value::Integer(i),
                Value::Blob(vec![0u8; 64]),
            ])
            .expect("row");
    }
    writer.finish().expect("finish");
    let pos = decode_client_response(&mut buf).expect("decode").position();
    let frame = buf.written().to_vec();

    c.bench_function("decode_rows_1000", |b| {
        b.iter(|| {
            let reader = Reader::at(&frame, pos).expect("reader");
            let mut stream = ResultStream::new(reader).expect("stream");
            let mut sum = 0i64;
            while let Some(row) = stream.next_row().expect("row") {
                let value: Option<i64> = row.get("value").expect("value");
                sum += value.unwrap_or_default();
            }
            sum
        });
    });
}

criterion_group!(result_benches, decode_rows_bench);
criterion_main!(result_benches);
