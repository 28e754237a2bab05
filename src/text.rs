//! Plain text histogram files.
//!
//! Every non-empty line not starting with `#` holds whitespace separated numbers.
//! One column is a list of counts, two columns are `channel count` pairs and three or
//! more columns are the rows of a matrix.
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;

use crate::histogram::{Histogram, HistogramObject, Matrix};

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

pub fn parse_object<R: BufRead>(name: &str, reader: R) -> io::Result<HistogramObject> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    invalid_data(format!("{name}: line {}: `{tok}` is not a number", lineno + 1))
                })
            })
            .collect::<io::Result<Vec<f64>>>()?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(invalid_data(format!(
                    "{name}: line {}: expected {} columns, found {}",
                    lineno + 1,
                    first.len(),
                    row.len()
                )));
            }
        }
        rows.push(row);
    }

    let columns = rows.first().map(|r| r.len()).unwrap_or(1);
    match columns {
        1 => Ok(HistogramObject::Histogram(Histogram::new(
            name,
            rows.into_iter().map(|r| r[0]).collect(),
        ))),
        2 => Ok(HistogramObject::Histogram(Histogram::new(name, place_channels(name, rows)?))),
        _ => Matrix::from_rows(name, rows)
            .map(HistogramObject::Matrix)
            .ok_or_else(|| invalid_data(format!("{name}: ragged matrix rows"))),
    }
}

/// Place `channel count` pairs at their channels, zero-filling gaps
fn place_channels(name: &str, rows: Vec<Vec<f64>>) -> io::Result<Vec<f64>> {
    let mut pairs = Vec::with_capacity(rows.len());
    for row in rows {
        let (channel, count) = (row[0], row[1]);
        if !channel.is_finite() || channel < 0.0 || channel.fract() != 0.0 {
            return Err(invalid_data(format!("{name}: `{channel}` is not a valid channel")));
        }
        pairs.push((channel as usize, count));
    }
    let size = pairs.iter().map(|(c, _)| c + 1).max().unwrap_or(0);
    let mut counts = vec![0.0; size];
    let mut seen = vec![false; size];
    for (channel, count) in pairs {
        if seen[channel] {
            return Err(invalid_data(format!("{name}: channel {channel} listed twice")));
        }
        seen[channel] = true;
        counts[channel] = count;
    }
    Ok(counts)
}

/// Read a histogram object, naming it after the file stem
pub fn read_object<P: AsRef<path::Path>>(path: P) -> io::Result<HistogramObject> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let reader = io::BufReader::new(fs::File::open(path)?);
    parse_object(&name, reader)
}

/// Read a one dimensional histogram, failing if the file holds a matrix
pub fn read_histogram<P: AsRef<path::Path>>(path: P) -> io::Result<Histogram> {
    match read_object(path)? {
        HistogramObject::Histogram(hist) => Ok(hist),
        HistogramObject::Matrix(m) => Err(invalid_data(format!(
            "{} is not a 1D histogram",
            m.name
        ))),
    }
}

pub fn write_histogram<W: Write>(hist: &Histogram, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "# {}", hist.title)?;
    for (i, count) in hist.counts.iter().enumerate() {
        writer.write_all(format!("{}\t{}\n", i, count).as_bytes())?;
    }
    Ok(())
}

pub fn to_file<P: AsRef<path::Path>>(hist: &Histogram, path: P) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_histogram(hist, &mut writer)?;
    writer.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::histogram::ObjectKind;

    #[test]
    fn test_parse_columns() -> io::Result<()> {
        let one = parse_object("a", io::Cursor::new("# counts\n1\n2\n\n3\n"))?;
        assert_eq!(one, HistogramObject::Histogram(Histogram::new("a", vec![1.0, 2.0, 3.0])));

        let two = parse_object("b", io::Cursor::new("0 5\n1 6\n2 7\n"))?;
        assert_eq!(two, HistogramObject::Histogram(Histogram::new("b", vec![5.0, 6.0, 7.0])));

        let three = parse_object("c", io::Cursor::new("1 2 3\n4 5 6\n"))?;
        assert_eq!(three.kind(), ObjectKind::Histogram2D);
        assert_eq!(three.shape(), "2x3");

        let empty = parse_object("d", io::Cursor::new("# nothing\n"))?;
        assert_eq!(empty.shape(), "0");
        Ok(())
    }

    #[test]
    fn test_parse_channel_pairs() -> io::Result<()> {
        let offset = parse_object("p", io::Cursor::new("100 5\n101 7\n103 9\n"))?;
        let HistogramObject::Histogram(hist) = offset else {
            panic!("expected a histogram, got {offset:?}");
        };
        assert_eq!(hist.counts.len(), 104);
        assert_eq!(hist.count(0), Some(0.0));
        assert_eq!(hist.count(100), Some(5.0));
        assert_eq!(hist.count(101), Some(7.0));
        assert_eq!(hist.count(102), Some(0.0));
        assert_eq!(hist.count(103), Some(9.0));

        let unordered = parse_object("u", io::Cursor::new("2 7\n0 5\n"))?;
        assert_eq!(unordered, HistogramObject::Histogram(Histogram::new("u", vec![5.0, 0.0, 7.0])));

        for bad in ["0 1\n0 2\n", "1.5 3\n", "-1 3\n", "inf 3\n"] {
            let err = parse_object("x", io::Cursor::new(bad)).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "{bad:?}");
        }
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_object("a", io::Cursor::new("1\nx\n")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = parse_object("a", io::Cursor::new("1 2\n3\n")).unwrap_err();
        assert!(err.to_string().contains("expected 2 columns"));
    }

    #[test]
    fn test_write() -> io::Result<()> {
        let hist = Histogram::new("h", vec![4.0, 0.5]).with_title("Ge detector");
        let mut buf = Vec::new();
        write_histogram(&hist, &mut buf)?;
        assert_eq!(String::from_utf8_lossy(&buf), "# Ge detector\n0\t4\n1\t0.5\n");
        Ok(())
    }

    #[test]
    fn test_read_file() -> io::Result<()> {
        let hist = read_histogram("./test/data/container/co60.txt")?;
        assert_eq!(hist.name, "co60");
        assert_eq!(hist.len(), 200);
        assert!(read_histogram("./test/data/container/gg_matrix.mtx").is_err());
        Ok(())
    }
}
