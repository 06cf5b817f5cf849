//! Stream a synthetic time series of 16-bit frames to a Zarr v2 or v3 dataset.
//!
//! `cargo run --example stream -- [v2|v3] [output path or URI]`
//!
//! Set `RUST_LOG=debug` to see each chunk row being flushed.
use zarr_sink::codecs::gzip_codec::GzipCodec;
use zarr_sink::prelude::*;

const HEIGHT: u64 = 48;
const WIDTH: u64 = 64;
const FRAMES: u64 = 25;

fn v2_metadata(frames: u64) -> serde_json::Value {
    serde_json::json!({
        "zarr_format": 2,
        "shape": [frames, HEIGHT, WIDTH],
        "chunks": [5, 16, 16],
        "dtype": DataType::UInt16.v2_dtype(),
        "compressor": {"id": "gzip", "level": 6},
        "fill_value": 0,
        "order": "C",
        "filters": null,
        "dimension_separator": "/",
    })
}

fn v3_metadata(frames: u64) -> serde_json::Value {
    serde_json::json!({
        "zarr_format": 3,
        "node_type": "array",
        "shape": [frames, HEIGHT, WIDTH],
        "data_type": DataType::UInt16.to_string(),
        "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [10, 48, 64]}},
        "chunk_key_encoding": {"name": "default", "configuration": {"separator": "/"}},
        "fill_value": 0,
        "codecs": [{
            "name": "sharding_indexed",
            "configuration": {
                "chunk_shape": [5, 16, 16],
                "codecs": [
                    {"name": "bytes", "configuration": {"endian": "little"}},
                    {"name": "gzip", "configuration": {"level": 6}}
                ],
                "index_codecs": [
                    {"name": "bytes", "configuration": {"endian": "little"}},
                    {"name": "crc32c"}
                ]
            }
        }],
        "dimension_names": ["t", "y", "x"],
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let version = match args.next().as_deref() {
        Some("v2") => ZarrVersion::V2,
        _ => ZarrVersion::V3,
    };
    let tmp = tempdir::TempDir::new("zarr-sink-stream")?;
    let store_path = match args.next() {
        Some(p) => p,
        None => tmp.path().join("stream.zarr").to_string_lossy().into_owned(),
    };

    // v3 packs 2 x 3 x 4 chunks into a single shard per shard row
    let shards = match version {
        ZarrVersion::V2 => [1, 1, 1],
        ZarrVersion::V3 => [2, 3, 4],
    };
    let dimensions = vec![
        Dimension::append("t", 0, 5).with_shard_size(shards[0]),
        Dimension::frame("y", HEIGHT, 16).with_shard_size(shards[1]),
        Dimension::frame("x", WIDTH, 16).with_shard_size(shards[2]),
    ];
    let settings = StreamSettings::new(&store_path, version, DataType::UInt16, dimensions)
        .with_compression(GzipCodec::default());

    let mut writer = ArrayWriter::open(settings)?;
    let n_px = (HEIGHT * WIDTH) as usize;
    for t in 0..FRAMES {
        let frame: Vec<u8> = (0..n_px)
            .flat_map(|i| ((t as usize * 7 + i) as u16).to_le_bytes())
            .collect();
        writer.append(&frame)?;
    }

    let (array_key, array_meta) = match version {
        ZarrVersion::V2 => ("0/.zarray", v2_metadata(writer.outer_extent())),
        ZarrVersion::V3 => ("0/zarr.json", v3_metadata(writer.outer_extent())),
    };
    let group_key = match version {
        ZarrVersion::V2 => ".zgroup",
        ZarrVersion::V3 => "zarr.json",
    };
    let group_meta = match version {
        ZarrVersion::V2 => serde_json::json!({"zarr_format": 2}),
        ZarrVersion::V3 => serde_json::json!({"zarr_format": 3, "node_type": "group"}),
    };
    for (key, meta) in [(group_key, group_meta), (array_key, array_meta)] {
        if let Some(sink) = writer.metadata_sink(key) {
            sink.write(0, serde_json::to_string_pretty(&meta)?.as_bytes())?;
        }
    }
    writer.close()?;

    println!("Wrote {} frames to {store_path}", writer.frames_written());
    Ok(())
}
