use rand::Rng;
use std::fs::File;
use std::io::Error;
use std::path::Path;

pub const HEADER: [&str; 5] = [
    "message_id",
    "identifier",
    "identifier_type",
    "correlation_key",
    "amount",
];

pub fn generate_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(HEADER)?;

    for i in 1..=rows {
        wtr.write_record([
            format!("M{i}").as_str(),
            format!("INSTR-{i}").as_str(),
            "InstrId",
            "BATCH-A",
            "1.0",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes messages spread randomly over 50 correlation keys until the file
/// reaches `size_mb`. Every tenth message resends an earlier identifier.
pub fn generate_large_csv(path: &Path, size_mb: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(HEADER)?;

    let target_size = (size_mb * 1024 * 1024) as u64;
    let mut seq: u64 = 1;
    let mut rng = rand::thread_rng();

    // Check size every 5000 rows to avoid syscall overhead
    loop {
        for _ in 0..5000 {
            let identifier = if seq % 10 == 0 { seq - 5 } else { seq };
            wtr.write_record([
                format!("M{seq}").as_str(),
                format!("INSTR-{identifier}").as_str(),
                "InstrId",
                format!("BATCH-{}", rng.gen_range(1..=50)).as_str(),
                format!("{}.{:02}", rng.gen_range(0..1000), rng.gen_range(0..100)).as_str(),
            ])?;
            seq += 1;
        }
        wtr.flush()?; // Flush to ensure file size is updated
        if std::fs::metadata(path)?.len() >= target_size {
            break;
        }
    }
    Ok(())
}
