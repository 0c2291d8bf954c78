//! Domain definition rewriting.
//!
//! The generated definition is adjusted in three ways:
//! 1. the domain type is forced to `kvm`
//! 2. the QEMU vendor namespace is declared on the root element
//! 3. a `-fw_cfg` argument exposing the node's Ignition file to the guest is
//!    appended right where the `<devices>` section closes
//!
//! The `<qemu:commandline>` block lands directly after `</devices>`, which
//! keeps it a child of `<domain>` as libvirt requires. Nothing else in the
//! document is touched.

use std::path::Path;

use crate::error::ClusterError;

/// libvirt's QEMU extension namespace.
pub const QEMU_NAMESPACE: &str = "http://libvirt.org/schemas/domain/qemu/1.0";

/// Firmware config key read by the guest's first-boot agent.
pub const FW_CFG_CONFIG_KEY: &str = "opt/org.flatcar-linux/config";

const DEVICES_CLOSE: &str = "</devices>";

/// Apply the node-specific adjustments to a generated definition.
pub fn customize_definition(xml: &str, config_path: &Path) -> Result<String, ClusterError> {
    let invalid = |message: &str| ClusterError::control_plane("define", message);

    let (open_start, open_end, attrs) =
        find_domain_open_tag(xml).ok_or_else(|| invalid("definition has no <domain> element"))?;

    let mut root = format!(r#"<domain type="kvm" xmlns:qemu="{QEMU_NAMESPACE}""#);
    for (name, value) in attrs {
        if name == "type" || name == "xmlns:qemu" {
            continue;
        }
        root.push_str(&format!(r#" {name}="{}""#, escape_attr(&unescape_attr(value))));
    }
    root.push('>');

    let body = &xml[open_end..];
    let devices_end = body
        .find(DEVICES_CLOSE)
        .map(|i| i + DEVICES_CLOSE.len())
        .ok_or_else(|| invalid("definition has no </devices> element"))?;

    let fw_cfg = format!(
        "name={FW_CFG_CONFIG_KEY},file={}",
        config_path.display().to_string().replace(',', ",,")
    );
    let commandline = format!(
        concat!(
            "\n  <qemu:commandline>",
            "\n    <qemu:arg value=\"-fw_cfg\"/>",
            "\n    <qemu:arg value=\"{}\"/>",
            "\n  </qemu:commandline>",
        ),
        escape_attr(&fw_cfg)
    );

    let mut out = String::with_capacity(xml.len() + root.len() + commandline.len());
    out.push_str(&xml[..open_start]);
    out.push_str(&root);
    out.push_str(&body[..devices_end]);
    out.push_str(&commandline);
    out.push_str(&body[devices_end..]);
    Ok(out)
}

/// Locate `<domain ...>`, returning its byte span and attributes.
fn find_domain_open_tag(xml: &str) -> Option<(usize, usize, Vec<(&str, &str)>)> {
    let mut search = 0;
    while let Some(offset) = xml[search..].find("<domain") {
        let start = search + offset;
        let after = &xml[start + "<domain".len()..];
        match after.chars().next() {
            Some(c) if c.is_whitespace() || c == '>' => {
                let close = after.find('>')?;
                let attrs = parse_attributes(&after[..close])?;
                return Some((start, start + "<domain".len() + close + 1, attrs));
            }
            // Some other element, e.g. <domainbus>.
            _ => search = start + "<domain".len(),
        }
    }
    None
}

fn parse_attributes(mut s: &str) -> Option<Vec<(&str, &str)>> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() {
            return Some(attrs);
        }
        let eq = s.find('=')?;
        let name = s[..eq].trim();
        let rest = s[eq + 1..].trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let end = rest[1..].find(quote)? + 1;
        attrs.push((name, &rest[1..end]));
        s = &rest[end + 1..];
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERATED: &str = r#"<domain type="qemu">
  <name>core1</name>
  <memory>1048576</memory>
  <devices>
    <disk type="file" device="disk">
      <source file="/var/lib/libvirt/images/core1.qcow2"/>
    </disk>
  </devices>
</domain>
"#;

    #[test]
    fn test_forces_kvm_and_namespace() {
        let xml = customize_definition(GENERATED, Path::new("/images/core1.ign")).unwrap();
        assert!(xml.starts_with(
            r#"<domain type="kvm" xmlns:qemu="http://libvirt.org/schemas/domain/qemu/1.0">"#
        ));
        assert!(!xml.contains(r#"type="qemu""#));
    }

    #[test]
    fn test_fw_cfg_follows_devices() {
        let xml = customize_definition(GENERATED, Path::new("/images/core1.ign")).unwrap();
        let devices_close = xml.find("</devices>").unwrap();
        let commandline = xml.find("<qemu:commandline>").unwrap();
        let domain_close = xml.find("</domain>").unwrap();

        assert!(devices_close < commandline && commandline < domain_close);
        assert_eq!(
            xml[devices_close + "</devices>".len()..commandline].trim(),
            ""
        );
        assert!(xml.contains(
            r#"<qemu:arg value="name=opt/org.flatcar-linux/config,file=/images/core1.ign"/>"#
        ));
    }

    #[test]
    fn test_preserves_other_content() {
        let xml = customize_definition(GENERATED, Path::new("/images/core1.ign")).unwrap();
        assert!(xml.contains("<name>core1</name>"));
        assert!(xml.contains(r#"<source file="/var/lib/libvirt/images/core1.qcow2"/>"#));
        assert_eq!(xml.matches("<qemu:commandline>").count(), 1);
    }

    #[test]
    fn test_single_quoted_attributes_and_extra_attrs() {
        let generated = "<domain type='kvm' id='7'><devices></devices></domain>";
        let xml = customize_definition(generated, Path::new("/i/n.ign")).unwrap();
        assert!(xml.starts_with(&format!(
            r#"<domain type="kvm" xmlns:qemu="{QEMU_NAMESPACE}" id="7">"#
        )));
    }

    #[test]
    fn test_path_escaping() {
        let xml = customize_definition(GENERATED, Path::new("/odd,dir/a&b.ign")).unwrap();
        assert!(xml.contains("file=/odd,,dir/a&amp;b.ign"));
    }

    #[test]
    fn test_rejects_definition_without_devices() {
        let err = customize_definition("<domain type=\"kvm\"></domain>", Path::new("/x.ign"))
            .unwrap_err();
        assert!(matches!(err, ClusterError::ControlPlane { .. }));
    }

    #[test]
    fn test_rejects_non_domain_document() {
        let err = customize_definition("<network></network>", Path::new("/x.ign")).unwrap_err();
        assert!(matches!(err, ClusterError::ControlPlane { .. }));
    }
}
