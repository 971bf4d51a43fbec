use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";

/// 控制台日志格式
/// 格式: [Time] [LEVEL] [Target] Message
pub struct ConsoleFormat;

fn level_style(level: &Level) -> (&'static str, &'static str) {
    if *level == Level::ERROR {
        ("\x1b[31m", "ERRO") // Red
    } else if *level == Level::WARN {
        ("\x1b[33m", "WARN") // Yellow
    } else if *level == Level::INFO {
        ("\x1b[32m", "INFO") // Green
    } else if *level == Level::DEBUG {
        ("\x1b[34m", "DEBG") // Blue
    } else {
        ("\x1b[90m", "TRCE")
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now = Local::now().format("%H:%M:%S");
        let (color, label) = level_style(meta.level());

        if writer.has_ansi_escapes() {
            write!(
                writer,
                "{GRAY}[{now}] {color}[{label}]{RESET} {CYAN}[{}]{RESET} ",
                meta.target()
            )?;
        } else {
            write!(writer, "[{now}] [{label}] [{}] ", meta.target())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// 初始化全局日志
///
/// `RUST_LOG` 优先；未设置时 `verbose` 决定是否输出 DEBUG。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(ConsoleFormat)
        .try_init();
}
