use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use log::{debug, error};

use crate::controller::{Command, RunController};

/// Reads operator commands from stdin on a dedicated thread, so a blocked
/// read never holds up the async runtime or process exit.
pub fn spawn(controller: Arc<RunController>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            run(stdin.lock(), io::stdout(), &controller)
        })
}

/// Applies every recognized line of `input` to the controller, writing
/// replies to `output`. Returns at end of input.
pub fn run<R: BufRead, W: Write>(input: R, mut output: W, controller: &RunController) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Console input closed: {}", e);
                return;
            }
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        debug!("Console command: {:?}", command);
        if let Some(reply) = controller.handle(command) {
            let _ = writeln!(output, "\n{}\n", reply);
            let _ = output.flush();
        }
    }
}
