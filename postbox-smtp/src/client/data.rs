/// Prepares a message body for the DATA phase.
///
/// Line endings are normalised to CRLF, lines starting with `.` get an extra
/// leading `.`, and the result always ends with CRLF so that the terminating
/// `.` lands on its own line.
#[must_use]
pub fn dot_stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 64 + 2);

    let body = body.strip_suffix('\n').unwrap_or(body);
    let body = body.strip_suffix('\r').unwrap_or(body);

    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}
