use std::any::Any;

use indicatif::ProgressStyle;

/// Style of the overall progress bar attached to the `execute` span.
pub(crate) fn get_style_execute() -> Option<ProgressStyle> {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .ok()
        .map(|style| style.progress_chars("=>-"))
}

/// Turns a payload caught by `catch_unwind` into an error.
pub(crate) fn panic_to_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    anyhow::anyhow!(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_messages() {
        let err = std::panic::catch_unwind(|| -> u8 { panic!("boom") }).unwrap_err();
        assert_eq!(panic_to_error(err).to_string(), "Task panicked: boom");

        let err = std::panic::catch_unwind(|| -> u8 { panic!("{} {}", "formatted", 1) }).unwrap_err();
        assert_eq!(panic_to_error(err).to_string(), "Task panicked: formatted 1");

        let err = std::panic::catch_unwind(|| -> u8 { std::panic::panic_any(7u8) }).unwrap_err();
        assert_eq!(
            panic_to_error(err).to_string(),
            "Task panicked with unknown payload"
        );
    }

    #[test]
    fn test_style_template_is_valid() {
        assert!(get_style_execute().is_some());
    }
}
