//! Real-time line streaming of a simulated device
//!
//! Writes one line per sample period to any async writer, so a simulated
//! device can stand in for a serial port or TCP producer.

use crate::ecg_simulator::{EcgSimulator, SimulatorConfig};
use ecg_core::EcgResult;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Buffer between the simulated device and its reader
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Stream lines at the simulator's sample rate until `max_lines` have been
/// written or the reader goes away.
///
/// Returns the number of lines written.
pub async fn stream_lines<W>(
    simulator: &mut EcgSimulator,
    writer: &mut W,
    max_lines: Option<u64>,
) -> EcgResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let period = Duration::from_secs_f64(1.0 / simulator.config().sample_rate);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut written = 0u64;
    while max_lines.map_or(true, |max| written < max) {
        ticker.tick().await;

        let mut line = simulator.next_line();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        written += 1;
    }

    writer.flush().await?;
    Ok(written)
}

/// Start a simulated device in the background and return the reading end.
///
/// The stream ends with EOF after `max_lines` lines; `None` streams until
/// the reading end is dropped.
pub fn spawn_line_stream(
    config: SimulatorConfig,
    max_lines: Option<u64>,
) -> EcgResult<(DuplexStream, JoinHandle<EcgResult<u64>>)> {
    let mut simulator = EcgSimulator::new(config)?;
    let (reader, mut writer) = tokio::io::duplex(DUPLEX_CAPACITY);

    let handle = tokio::spawn(async move {
        let result = stream_lines(&mut simulator, &mut writer, max_lines).await;
        match &result {
            Ok(lines) => tracing::debug!(lines, "Simulated device finished"),
            Err(e) => tracing::debug!(error = %e, "Simulated device closed"),
        }
        result
    });

    Ok((reader, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecg_simulator::LineFormat;
    use crate::signal_patterns::BeatPattern;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            format: LineFormat::Csv,
            ..SimulatorConfig::clean(1000.0, BeatPattern::Flat)
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_max_lines() {
        let (reader, handle) = spawn_line_stream(fast_config(), Some(20)).unwrap();

        let mut lines = BufReader::new(reader).lines();
        let mut received = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line);
        }

        assert_eq!(received.len(), 20);
        assert_eq!(received[0], "0.4,0.55,0.5");
        assert_eq!(handle.await.unwrap().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_stream_stops_when_reader_dropped() {
        let (reader, handle) = spawn_line_stream(fast_config(), None).unwrap();

        let mut lines = BufReader::new(reader).lines();
        for _ in 0..5 {
            assert!(lines.next_line().await.unwrap().is_some());
        }
        drop(lines);

        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_stream_into_buffer() {
        let mut simulator = EcgSimulator::new(fast_config()).unwrap();
        let mut buffer: Vec<u8> = Vec::new();

        let written = stream_lines(&mut simulator, &mut buffer, Some(3)).await.unwrap();

        assert_eq!(written, 3);
        assert_eq!(String::from_utf8(buffer).unwrap().lines().count(), 3);
    }
}
