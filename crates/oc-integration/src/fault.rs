//! Guest fault reports
//!
//! Guest-facing operations report failure codes here. The report names the
//! guest function the calling worker was executing.

use oc_core::current_thread;

pub const CELL_ESRCH: u32 = 0x8001_0005;
pub const CELL_EDEADLK: u32 = 0x8001_0008;

/// Threads of the audio mixer fail these locks routinely during teardown
const NOISY_THREADS: [&str; 2] = ["_cellsurMixerMain", "_sys_MixerChStripMain"];
const NOISY_FUNCTIONS: [&str; 2] = ["sys_mutex_lock", "sys_lwmutex_lock"];

fn is_expected(code: u32, thread: &str, function: &str) -> bool {
    (code == CELL_ESRCH || code == CELL_EDEADLK)
        && NOISY_THREADS.contains(&thread)
        && NOISY_FUNCTIONS.contains(&function)
}

fn render(function: &str, code: u32, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("'{function}' failed with 0x{code:08x} : {detail}"),
        None => format!("'{function}' failed with 0x{code:08x}"),
    }
}

/// Log a failure code raised on behalf of the current guest thread
///
/// Returns the code reinterpreted as the guest's signed error value.
pub fn report_guest_fault(code: u32, detail: Option<&str>) -> i32 {
    let thread = current_thread();
    let function = thread
        .as_ref()
        .and_then(|t| t.last_function())
        .unwrap_or("Unknown function");
    let message = render(function, code, detail);

    match &thread {
        Some(t) if is_expected(code, t.name(), function) => tracing::trace!("{}", message),
        Some(t) => {
            t.set_last_error(message.clone());
            tracing::error!("{}", message);
        }
        None => tracing::error!("{}", message),
    }

    code as i32
}
