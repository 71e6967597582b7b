use itertools::Itertools;

use crate::common::error::validation_error;
use crate::gridengine::template::{ArrayParams, JobTemplate};

/// `qsub` flags that must not be passed through the native specification.
///
/// They change how `qsub` itself behaves (blocking, verification, array expansion), which the
/// broker relies on controlling.
pub const RESERVED_NATIVE_FLAGS: [&str; 5] = ["-help", "-sync", "-t", "-verify", "-w"];

pub fn check_native_specification(tokens: &[String]) -> crate::Result<()> {
    if let Some(flag) = tokens
        .iter()
        .find(|token| RESERVED_NATIVE_FLAGS.contains(&token.as_str()))
    {
        return validation_error(format!(
            "Native specification flag `{flag}` is reserved"
        ));
    }
    Ok(())
}

/// Builds the `qsub` arguments for the given template.
///
/// The flag order is fixed: working directory, hold, environment, email, name, I/O paths,
/// join, start time, array range, native specification and finally the command itself.
pub fn build_submit_args(
    template: &JobTemplate,
    array: Option<&ArrayParams>,
) -> crate::Result<Vec<String>> {
    template.validate()?;
    check_native_specification(&template.native_specification)?;

    let mut args: Vec<String> = Vec::new();
    let mut push = |flag: &str, value: Option<&str>| {
        args.push(flag.to_string());
        if let Some(value) = value {
            args.push(value.to_string());
        }
    };

    if let Some(dir) = &template.working_directory {
        push("-wd", Some(dir.as_str()));
    }
    if template.submit_as_hold {
        push("-h", None);
    }
    if !template.job_environment.is_empty() {
        let variables = template
            .job_environment
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(",");
        push("-v", Some(variables.as_str()));
    }
    if !template.email.is_empty() {
        push("-M", Some(template.email.join(",").as_str()));
    }
    if template.block_email {
        push("-m", Some("n"));
    }
    if let Some(name) = &template.job_name {
        push("-N", Some(name.as_str()));
    }
    if let Some(path) = &template.input_path {
        push("-i", Some(path.as_str()));
    }
    if let Some(path) = &template.output_path {
        push("-o", Some(path.as_str()));
    }
    if let Some(path) = &template.error_path {
        push("-e", Some(path.as_str()));
    }
    if template.join_files {
        push("-j", Some("y"));
    }
    if let Some(time) = &template.start_time {
        push("-a", Some(time.as_str()));
    }
    if let Some(array) = array {
        push("-t", Some(array.to_qsub_range().as_str()));
    }

    args.extend(template.native_specification.iter().cloned());
    args.push(template.remote_command.clone());
    args.extend(template.args.iter().cloned());
    Ok(args)
}

/// Renders a command line for logs and dry runs.
pub fn format_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        }))
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{build_submit_args, format_command_line};
    use crate::common::error::GridgateError;
    use crate::gridengine::template::{ArrayParams, JobTemplate};

    fn full_template() -> JobTemplate {
        let mut template = JobTemplate::new("/home/alice/run.sh");
        template.args = vec!["--input".into(), "data.txt".into()];
        template.submit_as_hold = true;
        template.job_environment.insert("B".into(), "2".into());
        template.job_environment.insert("A".into(), "1".into());
        template.working_directory = Some("/scratch".into());
        template.native_specification = vec!["-q".into(), "all.q".into()];
        template.email = vec!["a@x.org".into(), "b@x.org".into()];
        template.block_email = true;
        template.start_time = Some("202001021000".into());
        template.job_name = Some("run".into());
        template.input_path = Some("in".into());
        template.output_path = Some("out".into());
        template.error_path = Some("err".into());
        template.join_files = true;
        template
    }

    #[test]
    fn build_minimal_args() {
        let args = build_submit_args(&JobTemplate::new("run.sh"), None).unwrap();
        assert_eq!(args, vec!["run.sh"]);
    }

    #[test]
    fn build_args_in_fixed_order() {
        let args = build_submit_args(&full_template(), None).unwrap();
        assert_eq!(
            args,
            vec![
                "-wd",
                "/scratch",
                "-h",
                "-v",
                "A=1,B=2",
                "-M",
                "a@x.org,b@x.org",
                "-m",
                "n",
                "-N",
                "run",
                "-i",
                "in",
                "-o",
                "out",
                "-e",
                "err",
                "-j",
                "y",
                "-a",
                "202001021000",
                "-q",
                "all.q",
                "/home/alice/run.sh",
                "--input",
                "data.txt",
            ]
        );
    }

    #[test]
    fn build_array_args() {
        let array = ArrayParams::new(1, 10, 1).unwrap();
        let args = build_submit_args(&JobTemplate::new("run.sh"), Some(&array)).unwrap();
        assert_eq!(args, vec!["-t", "1-10:1", "run.sh"]);
    }

    #[test]
    fn reserved_native_flags_are_rejected() {
        for flag in ["-help", "-sync", "-t", "-verify", "-w"] {
            let mut template = JobTemplate::new("run.sh");
            template.native_specification = vec![flag.to_string(), "y".to_string()];
            assert!(
                matches!(
                    build_submit_args(&template, None),
                    Err(GridgateError::ValidationError(_))
                ),
                "{flag}"
            );
        }
    }

    #[test]
    fn similar_native_flags_are_allowed() {
        let mut template = JobTemplate::new("run.sh");
        template.native_specification = vec!["-wd".into(), "/tmp".into(), "-tc".into(), "2".into()];
        assert!(build_submit_args(&template, None).is_ok());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(build_submit_args(&JobTemplate::new(""), None).is_err());
    }

    #[test]
    fn format_command() {
        let line = format_command_line("qsub", &["-N".into(), "my job".into(), "run.sh".into()]);
        assert_eq!(line, "qsub -N 'my job' run.sh");
    }
}
