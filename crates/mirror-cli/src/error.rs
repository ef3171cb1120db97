// Errors reaching main are configuration or usage problems; sync failures are
// reported per job and turned into an exit code by the run command.

pub const USAGE_EXIT_CODE: u8 = 2;

pub fn format_error(err: &anyhow::Error) -> String {
    let mut msg = format!("error: {err}");
    for cause in err.chain().skip(1) {
        msg.push_str(&format!("\n  caused by: {cause}"));
    }
    msg
}
