//! Writes `deploy.sh`, a plain shell script that deploys every synthesized
//! stack with the aws cli and then syncs each site's files into its bucket.
//! Useful where the crate is built without the `aws` feature.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::site::SiteStack;
use crate::template::Template;

pub const SCRIPT_NAME: &str = "deploy.sh";

/// single quotes a word for bash.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c)) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

pub fn render(config: &Config, sites: &[SiteStack]) -> String {
    let region = shell_quote(&config.region);
    let mut out = String::new();
    out.push_str("#!/usr/bin/env bash\n");
    out.push_str("set -euo pipefail\n");
    for site in sites {
        let stack = site.name();
        let template = config.out_dir.join(Template::file_name(stack));
        let assets = format!("{}/", site.config.asset_path.display().to_string().trim_end_matches('/'));
        let _ = writeln!(out);
        let _ = writeln!(out, "# {}", site.config.domain);
        let _ = writeln!(
            out,
            "aws --region {region} cloudformation deploy --stack-name {} --template-file {} --capabilities CAPABILITY_IAM --disable-rollback --no-fail-on-empty-changeset",
            shell_quote(stack),
            shell_quote(&template.display().to_string()),
        );
        let _ = writeln!(
            out,
            "bucket=$(aws --region {region} cloudformation describe-stacks --stack-name {} --query \"Stacks[0].Outputs[?OutputKey=='BucketName'].OutputValue\" --output text)",
            shell_quote(stack),
        );
        let _ = writeln!(out, "aws --region {region} s3 sync --delete {} \"s3://${{bucket}}\"", shell_quote(&assets));
    }
    out
}

/// writes the script into `dir` and makes it executable.
pub fn write<P: AsRef<Path>>(dir: P, config: &Config, sites: &[SiteStack]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(SCRIPT_NAME);
    std::fs::write(&path, render(config, sites))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    tracing::info!(path = %path.display(), sites = sites.len(), "wrote deploy script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::resources::HostedZone;

    fn sites() -> (Config, Vec<SiteStack>) {
        let a = SiteConfig::new("example.com", false, "./sites/example");
        let b = SiteConfig::new("example.org", true, "./sites/my site/");
        let built = vec![
            SiteStack::build(&a, &HostedZone::new("example.com", "Z1")).unwrap(),
            SiteStack::build(&b, &HostedZone::new("example.org", "Z2")).unwrap(),
        ];
        (Config::new(vec![a, b]), built)
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("./site/out"), "./site/out");
        assert_eq!(shell_quote("my site"), "'my site'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn deploys_then_syncs_every_site() {
        let (config, sites) = sites();
        let script = render(&config, &sites);
        assert!(script.starts_with("#!/usr/bin/env bash\nset -euo pipefail\n"));
        assert_eq!(script.matches("cloudformation deploy").count(), 2);
        assert!(script.contains("--stack-name example-com-site --template-file cdk.out/example-com-site.template.json"));
        assert!(script.contains("s3 sync --delete ./sites/example/ \"s3://${bucket}\""));
        assert!(script.contains("s3 sync --delete './sites/my site/'"));
        let deploy = script.find("--stack-name example-org-site --template-file").unwrap();
        let sync = script.find("'./sites/my site/'").unwrap();
        assert!(deploy < sync);
    }

    #[cfg(unix)]
    #[test]
    fn written_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (config, sites) = sites();
        let path = write(dir.path(), &config, &sites).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
