//! Main application state and session coordination

use std::fmt::Write as _;
use std::io;
use std::time::Instant;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::core::document::format_date_time;
use crate::core::store::DocumentStore;

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a blank document
    New,
    /// Open a document by id
    Open(String),
    /// Delete a document by id
    Delete(String),
    /// Save the draft now
    Save,
    /// Replace the draft and save it
    Set(String),
    /// List documents
    List,
    /// Print the draft
    Show,
    /// Flush and exit
    Quit,
    /// Append a line to the draft
    Append(String),
}

impl Command {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self, String> {
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Self::Append(line.to_string()));
        };
        if rest.starts_with(':') {
            return Ok(Self::Append(rest.to_string()));
        }

        let (name, arg) = match rest.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest.trim(), ""),
        };

        let require_arg = |command: fn(String) -> Self| {
            if arg.is_empty() {
                Err(format!("`:{name}` needs an argument"))
            } else {
                Ok(command(arg.to_string()))
            }
        };

        match name {
            "new" => Ok(Self::New),
            "open" => require_arg(Self::Open),
            "rm" => require_arg(Self::Delete),
            "save" => Ok(Self::Save),
            "set" => Ok(Self::Set(unescape(arg))),
            "ls" => Ok(Self::List),
            "show" => Ok(Self::Show),
            "quit" | "q" => Ok(Self::Quit),
            _ => Err(format!("Unknown command `:{name}`")),
        }
    }
}

/// Expand `\n` and `\\` escapes
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Result of handling one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading; print the text if any
    Continue(Option<String>),
    /// Stop the session
    Quit,
}

/// Application state for an editing session
pub struct TextpadApp {
    store: DocumentStore,
}

impl TextpadApp {
    /// Create the app and load stored documents
    pub fn new(mut store: DocumentStore) -> Self {
        store.initialize();
        Self { store }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Parse and run one input line
    pub fn handle_line(&mut self, line: &str) -> Outcome {
        match Command::parse(line) {
            Ok(command) => self.execute(command),
            Err(message) => Outcome::Continue(Some(message)),
        }
    }

    /// Run a command against the store
    pub fn execute(&mut self, command: Command) -> Outcome {
        let message = match command {
            Command::New => {
                self.store.create_new_file();
                Some("New document".to_string())
            }
            Command::Open(id) => {
                self.store.open_file(&id);
                match self.store.current_file() {
                    Some(file) if file.id == id => Some(file.content.clone()),
                    _ => Some(format!("No document `{id}`")),
                }
            }
            Command::Delete(id) => {
                self.store.delete_file(&id);
                None
            }
            Command::Save => {
                self.store.save_current_file();
                None
            }
            Command::Set(text) => {
                self.store.set_content(text);
                None
            }
            Command::List => Some(self.list()),
            Command::Show => Some(self.store.current_content().to_string()),
            Command::Quit => {
                self.flush();
                return Outcome::Quit;
            }
            Command::Append(line) => {
                let mut draft = self.store.current_content().to_string();
                if !draft.is_empty() {
                    draft.push('\n');
                }
                draft.push_str(&line);
                self.store.update_content(draft);
                None
            }
        };
        Outcome::Continue(message)
    }

    /// Fire the autosave if it is due
    pub fn poll_autosave(&mut self, now: Instant) -> bool {
        self.store.poll_autosave(now)
    }

    /// Save the draft before exit
    pub fn flush(&mut self) {
        if self.store.has_pending_save() {
            tracing::info!("Flushing unsaved draft");
        }
        self.store.save_current_file();
    }

    fn list(&self) -> String {
        let mut out = String::new();
        let current = self.store.current_file_id();
        for file in self.store.files() {
            let marker = if current == Some(file.id.as_str()) { '*' } else { ' ' };
            let _ = writeln!(
                out,
                "{} {}  {:<20}  {}",
                marker,
                file.id,
                file.title,
                format_date_time(file.updated_at)
            );
        }
        if out.is_empty() {
            out.push_str("No documents");
        }
        out.trim_end().to_string()
    }
}

/// Feed input lines to the app while driving the autosave deadline.
///
/// The draft is flushed on every exit path, including read and write errors.
pub async fn run<R, W>(app: &mut TextpadApp, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: io::Write,
{
    let result = drive(app, input, output).await;
    if let Err(e) = &result {
        tracing::warn!("Session aborted: {}", e);
        app.flush();
    }
    result
}

async fn drive<R, W>(app: &mut TextpadApp, mut input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: io::Write,
{
    let mut buf = Vec::new();

    loop {
        let deadline = app.store().autosave_deadline();
        let sleep = tokio::time::sleep_until(
            deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(tokio::time::Instant::now),
        );

        tokio::select! {
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    app.flush();
                    return Ok(());
                }

                let line = decode_line(&buf);
                buf.clear();

                match app.handle_line(&line) {
                    Outcome::Continue(Some(text)) => {
                        writeln!(output, "{text}")?;
                        output.flush()?;
                    }
                    Outcome::Continue(None) => {}
                    Outcome::Quit => return Ok(()),
                }
            }
            _ = sleep, if deadline.is_some() => {
                app.poll_autosave(Instant::now());
            }
        }
    }
}

/// Strip the line ending and decode, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match String::from_utf8_lossy(raw) {
        std::borrow::Cow::Borrowed(line) => line.to_string(),
        std::borrow::Cow::Owned(line) => {
            tracing::warn!("Replaced invalid UTF-8 in input line");
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncRead, BufReader, ReadBuf};

    use super::*;
    use crate::core::storage::MemoryStorage;

    fn app() -> TextpadApp {
        TextpadApp::new(DocumentStore::new(Some(Box::new(MemoryStorage::new()))))
    }

    /// Yields `data` once, then fails every read
    struct BrokenReader {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::other("read failed"))),
            }
        }
    }

    /// Output sink that rejects every write
    struct BrokenWriter;

    impl io::Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(":new"), Ok(Command::New));
        assert_eq!(Command::parse(":open abc"), Ok(Command::Open("abc".into())));
        assert_eq!(Command::parse(":rm abc "), Ok(Command::Delete("abc".into())));
        assert_eq!(Command::parse(":save"), Ok(Command::Save));
        assert_eq!(Command::parse(":ls"), Ok(Command::List));
        assert_eq!(Command::parse(":show"), Ok(Command::Show));
        assert_eq!(Command::parse(":q"), Ok(Command::Quit));
        assert_eq!(
            Command::parse(":set a\\nb"),
            Ok(Command::Set("a\nb".into()))
        );
    }

    #[test]
    fn test_parse_plain_and_escaped_lines() {
        assert_eq!(
            Command::parse("just text"),
            Ok(Command::Append("just text".into()))
        );
        assert_eq!(
            Command::parse("::colon first"),
            Ok(Command::Append(":colon first".into()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(":open").is_err());
        assert!(Command::parse(":bogus").is_err());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\nb\\\\c\\t"), "a\nb\\c\\t");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff\xfe\n"), "bad \u{fffd}\u{fffd}");
    }

    #[test]
    fn test_append_is_debounced() {
        let mut app = app();

        app.handle_line("Hello");
        app.handle_line("world");

        assert_eq!(app.store().current_content(), "Hello\nworld");
        assert!(app.store().files().is_empty());
        assert!(app.store().has_pending_save());

        assert!(app.poll_autosave(Instant::now() + Duration::from_secs(2)));
        let files = app.store().files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].title, "Hello");
    }

    #[test]
    fn test_new_open_and_delete() {
        let mut app = app();

        app.handle_line(":set first");
        app.handle_line(":new");
        app.handle_line(":set second");
        let first_id = app.store().files()[0].id.clone();

        let outcome = app.handle_line(&format!(":open {first_id}"));
        assert_eq!(outcome, Outcome::Continue(Some("first".to_string())));

        app.handle_line(&format!(":rm {first_id}"));
        assert_eq!(app.store().files().len(), 1);
        assert_eq!(app.store().current_content(), "second");
    }

    #[test]
    fn test_open_unknown_reports() {
        let mut app = app();
        let outcome = app.handle_line(":open nope");
        assert_eq!(outcome, Outcome::Continue(Some("No document `nope`".to_string())));
    }

    #[test]
    fn test_list_marks_current() {
        let mut app = app();
        assert_eq!(
            app.handle_line(":ls"),
            Outcome::Continue(Some("No documents".to_string()))
        );

        app.handle_line(":set note");
        let Outcome::Continue(Some(listing)) = app.handle_line(":ls") else {
            panic!("expected listing");
        };
        assert!(listing.starts_with("* "));
        assert!(listing.contains("note"));
        let stamp = format_date_time(app.store().files()[0].updated_at);
        assert!(listing.ends_with(&stamp));
    }

    #[test]
    fn test_quit_flushes_draft() {
        let mut app = app();
        app.handle_line("unsaved");
        assert_eq!(app.handle_line(":quit"), Outcome::Quit);
        assert_eq!(app.store().files().len(), 1);
        assert!(!app.store().has_pending_save());
    }

    #[tokio::test]
    async fn test_run_flushes_at_end_of_input() {
        let mut app = app();
        let mut output = Vec::new();

        run(&mut app, &b"hello draft\n:show\n"[..], &mut output)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "hello draft\n");
        assert_eq!(app.store().files().len(), 1);
        assert_eq!(app.store().files()[0].content, "hello draft");
    }

    #[tokio::test]
    async fn test_run_survives_invalid_utf8() {
        let mut app = app();
        let mut output = Vec::new();

        run(&mut app, &b"hello draft\n\xff\xfe\n"[..], &mut output)
            .await
            .unwrap();

        let files = app.store().files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "hello draft\n\u{fffd}\u{fffd}");
    }

    #[tokio::test]
    async fn test_run_flushes_draft_on_read_error() {
        let mut app = app();
        let input = BufReader::new(BrokenReader {
            data: Some(b"hello draft\n"),
        });

        let result = run(&mut app, input, &mut Vec::new()).await;

        assert!(result.is_err());
        assert!(!app.store().has_pending_save());
        assert_eq!(app.store().files().len(), 1);
        assert_eq!(app.store().files()[0].content, "hello draft");
    }

    #[tokio::test]
    async fn test_run_flushes_draft_on_write_error() {
        let mut app = app();

        let result = run(&mut app, &b"hello draft\n:show\n"[..], &mut BrokenWriter).await;

        assert!(result.is_err());
        assert_eq!(app.store().files().len(), 1);
        assert_eq!(app.store().files()[0].content, "hello draft");
    }
}
