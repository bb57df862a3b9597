use std::fmt::Display;

use itertools::Itertools;

use crate::{
    coloring::{StateColor, StateColoring},
    pdrta::{Pdrta, StateId},
    INFINITY,
};

fn escape_label(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Attributes of a node in the DOT output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DotStateAttribute {
    /// The label of a node
    Label(String),
    /// The shape of a node
    Shape(String),
    /// The color of a node
    Color(String),
}

impl Display for DotStateAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DotStateAttribute::Label(s) => write!(f, "label=\"{}\"", escape_label(s)),
            DotStateAttribute::Shape(s) => write!(f, "shape=\"{s}\""),
            DotStateAttribute::Color(c) => write!(f, "color=\"{c}\""),
        }
    }
}

/// Attributes of an edge in the DOT output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DotTransitionAttribute {
    /// The label of an edge
    Label(String),
    /// Draw the edge dashed
    Dashed,
}

impl Display for DotTransitionAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DotTransitionAttribute::Label(lbl) => write!(f, "label=\"{}\"", escape_label(lbl)),
            DotTransitionAttribute::Dashed => write!(f, "style=\"dashed\""),
        }
    }
}

impl Pdrta {
    fn dot_state_ident(&self, q: StateId) -> String {
        format!("q{q}")
    }

    fn dot_state_attributes(
        &self,
        q: StateId,
        coloring: Option<&StateColoring>,
    ) -> Vec<DotStateAttribute> {
        let Some(state) = self.state(q) else {
            return vec![];
        };
        let shape = if state.is_final() {
            "doublecircle"
        } else {
            "circle"
        };
        let mut attributes = vec![
            DotStateAttribute::Shape(shape.into()),
            DotStateAttribute::Label(format!("q{q} ({})", state.visits())),
        ];
        match coloring.map(|c| c.color(q)) {
            Some(StateColor::Red) => attributes.push(DotStateAttribute::Color("red".into())),
            Some(StateColor::Blue) => attributes.push(DotStateAttribute::Color("blue".into())),
            _ => {}
        }
        attributes
    }

    /// Compute the graphviz representation, for more information on the DOT format,
    /// see the [graphviz documentation](https://graphviz.org/doc/info/lang.html).
    /// Every interval with a target becomes one edge labelled with symbol, guard and number of
    /// tails. Degenerate intervals are drawn dashed.
    pub fn dot_representation(&self) -> String {
        self.dot_with_coloring(None)
    }

    /// Like [`Self::dot_representation`], with red and blue states highlighted.
    pub fn dot_with_coloring(&self, coloring: Option<&StateColoring>) -> String {
        let header = [
            "digraph PDRTA {".to_string(),
            "rankdir=LR".to_string(),
            "init [label=\"\", shape=none]".to_string(),
            format!("init -> {}", self.dot_state_ident(self.root())),
        ];
        let states = self.state_ids().map(|q| {
            format!(
                "{} [{}]",
                self.dot_state_ident(q),
                self.dot_state_attributes(q, coloring)
                    .into_iter()
                    .map(|attr| attr.to_string())
                    .join(", ")
            )
        });
        let transitions = self.transitions().into_iter().filter_map(|t| {
            let target = t.target?;
            let symbol = self
                .alphabet()
                .symbol(t.symbol)
                .map_or_else(|| t.symbol.to_string(), str::to_string);
            let guard = if t.begin == 0 && t.end == INFINITY {
                String::new()
            } else if t.end == INFINITY {
                format!(" [{}, inf)", t.begin)
            } else {
                format!(" [{}, {})", t.begin, t.end)
            };
            let mut attributes = vec![DotTransitionAttribute::Label(format!(
                "{symbol}{guard} #{}",
                t.delays.len()
            ))];
            if t.degenerate {
                attributes.push(DotTransitionAttribute::Dashed);
            }
            Some(format!(
                "{} -> {} [{}]",
                self.dot_state_ident(t.source),
                self.dot_state_ident(target),
                attributes.into_iter().map(|attr| attr.to_string()).join(", ")
            ))
        });
        header
            .into_iter()
            .chain(states)
            .chain(transitions)
            .chain(std::iter::once("}".to_string()))
            .join("\n")
    }

    /// Renders the automaton as PNG into `filename` by handing the DOT text to the `dot`
    /// executable through a temporary file. Whatever `dot` prints to stderr becomes the message of
    /// the returned error. Only available with the `graphviz` crate feature.
    #[cfg(feature = "graphviz")]
    pub fn render_to_file_name(&self, filename: &str) -> Result<(), std::io::Error> {
        use std::{io::Write, process::Stdio};
        use tracing::trace;

        let mut source = tempfile::NamedTempFile::new()?;
        source.write_all(self.dot_representation().as_bytes())?;
        source.flush()?;
        trace!("rendering {} states to {filename}", self.size());

        let output = std::process::Command::new("dot")
            .arg("-Tpng")
            .arg("-o")
            .arg(filename)
            .arg(source.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            if message.is_empty() {
                format!("dot exited with {}", output.status)
            } else {
                message
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::{coloring::StateColoring, pdrta::Pdrta, word::TimedSample};

    #[test]
    fn dot_output() {
        let sample = TimedSample::from_symbolic([
            vec![("a", 1), ("b", 2)],
            vec![("a", 1), ("b", 2)],
            vec![("a", 4)],
        ]);
        let pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        let coloring = StateColoring::new(&pdrta);
        let dot = pdrta.dot_with_coloring(Some(&coloring));
        assert!(dot.starts_with("digraph PDRTA {"));
        assert!(dot.ends_with('}'));
        assert!(dot.contains("init -> q0"));
        assert!(dot.contains("q0 -> q1 [label=\"a #3\"]"));
        assert!(dot.contains("q1 -> q2 [label=\"b #2\", style=\"dashed\"]"));
        assert!(dot.contains("q2 [shape=\"doublecircle\", label=\"q2 (2)\"]"));
        assert!(dot.contains("color=\"red\""));
        assert!(dot.contains("color=\"blue\""));
        assert!(!pdrta.dot_representation().contains("color="));
    }

    #[test]
    fn symbol_names_are_escaped() {
        let sample = TimedSample::from_symbolic([vec![("say \"hi\"", 3)]]);
        let pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        assert!(pdrta
            .dot_representation()
            .contains("q0 -> q1 [label=\"say \\\"hi\\\" #1\", style=\"dashed\"]"));
    }

    #[cfg(feature = "graphviz")]
    #[test]
    fn rendering_reports_dot_errors() {
        if std::process::Command::new("dot").arg("-V").output().is_err() {
            return;
        }
        let sample = TimedSample::from_symbolic([vec![("a", 1)], vec![("a", 2)]]);
        let pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let png = dir.path().join("pta.png");
        pdrta.render_to_file_name(png.to_str().unwrap()).unwrap();
        assert!(png.exists());

        let unreachable = dir.path().join("missing").join("pta.png");
        let err = pdrta
            .render_to_file_name(unreachable.to_str().unwrap())
            .unwrap_err();
        assert!(!err.to_string().is_empty());
        assert_ne!(err.to_string(), "Error in dot...");
    }
}
