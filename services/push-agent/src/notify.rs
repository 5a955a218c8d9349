//! Parsing change notifications.
//!
//! Stdin lines are `save_name<TAB>path[<TAB>copy]`; command-line entries are
//! `save_name=path` or a bare path whose file name becomes the save name.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use runpush_core::UploadRequest;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// Read notifications until EOF, passing each request to `notify`.
///
/// Lines that are not UTF-8 or do not parse are logged and skipped; only
/// read errors end the stream early. Returns the number of requests passed on.
pub async fn read_notifications<R>(
    mut reader: R,
    mut notify: impl FnMut(UploadRequest),
) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line_no: u64 = 0;
    let mut delivered = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping notification that is not UTF-8");
                continue;
            }
        };
        match parse_line(line) {
            Ok(Some(request)) => {
                notify(request);
                delivered += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "Skipping malformed notification"),
        }
    }

    Ok(delivered)
}

/// Parse one stdin line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<UploadRequest>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split('\t');
    let save_name = fields.next().unwrap_or_default().trim();
    let path = fields
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("missing path in notification: {line:?}"))?;
    let copy = match fields.next().map(str::trim) {
        None | Some("") => false,
        Some(flag) => parse_copy_flag(flag)?,
    };
    if fields.next().is_some() {
        bail!("too many fields in notification: {line:?}");
    }
    if save_name.is_empty() {
        bail!("missing save name in notification: {line:?}");
    }

    Ok(Some(UploadRequest::new(save_name, path, copy)))
}

/// Parse one command-line file argument.
pub fn parse_arg(arg: &str, copy: bool) -> Result<UploadRequest> {
    if let Some((save_name, path)) = arg.split_once('=') {
        if save_name.is_empty() || path.is_empty() {
            bail!("expected save_name=path, got {arg:?}");
        }
        return Ok(UploadRequest::new(save_name, path, copy));
    }

    let path = PathBuf::from(arg);
    let save_name = file_name(&path).ok_or_else(|| anyhow!("no file name in {arg:?}"))?;
    Ok(UploadRequest::new(save_name, path, copy))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn parse_copy_flag(flag: &str) -> Result<bool> {
    match flag.to_ascii_lowercase().as_str() {
        "copy" | "true" | "1" | "yes" => Ok(true),
        "nocopy" | "false" | "0" | "no" => Ok(false),
        other => bail!("invalid copy flag: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("output.log\t/run/files/output.log", "output.log", "/run/files/output.log", false)]
    #[case("model.h5\t/tmp/model.h5\tcopy", "model.h5", "/tmp/model.h5", true)]
    #[case("cfg.yaml\t/run/cfg.yaml\tfalse\r\n", "cfg.yaml", "/run/cfg.yaml", false)]
    #[case("media/img.png\t/run/media/img.png\t1", "media/img.png", "/run/media/img.png", true)]
    fn test_parse_line(
        #[case] line: &str,
        #[case] save_name: &str,
        #[case] path: &str,
        #[case] copy: bool,
    ) {
        let request = parse_line(line).unwrap().unwrap();
        assert_eq!(request, UploadRequest::new(save_name, path, copy));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("# comment")]
    fn test_parse_line_skips(#[case] line: &str) {
        assert!(parse_line(line).unwrap().is_none());
    }

    #[rstest]
    #[case("only-a-name")]
    #[case("\t/path/without/name")]
    #[case("name\t/path\tmaybe")]
    #[case("name\t/path\tcopy\textra")]
    fn test_parse_line_rejects(#[case] line: &str) {
        assert!(parse_line(line).is_err());
    }

    #[tokio::test]
    async fn test_read_notifications_skips_bad_lines() {
        let input: &[u8] = b"bad\x80name\t/tmp/x\nnot a notification\n\nok.txt\t/tmp/ok.txt\nlast.bin\t/tmp/last.bin\tcopy";
        let mut seen = Vec::new();

        let delivered = read_notifications(input, |request| seen.push(request))
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(
            seen,
            vec![
                UploadRequest::new("ok.txt", "/tmp/ok.txt", false),
                UploadRequest::new("last.bin", "/tmp/last.bin", true),
            ]
        );
    }

    #[rstest]
    #[case("weights=/tmp/model.bin", "weights", "/tmp/model.bin")]
    #[case("/run/files/output.log", "output.log", "/run/files/output.log")]
    #[case("summary.json", "summary.json", "summary.json")]
    fn test_parse_arg(#[case] arg: &str, #[case] save_name: &str, #[case] path: &str) {
        let request = parse_arg(arg, true).unwrap();
        assert_eq!(request, UploadRequest::new(save_name, path, true));
    }

    #[rstest]
    #[case("=/tmp/x")]
    #[case("name=")]
    #[case("/")]
    fn test_parse_arg_rejects(#[case] arg: &str) {
        assert!(parse_arg(arg, false).is_err());
    }
}
