//! Pattern-match exhaustiveness and reachability.
//!
//! A usefulness computation in the style of Maranget: patterns are
//! incrementally subtracted from the space of possible scrutinee values by
//! specializing a pattern matrix per head constructor. An arm that adds
//! nothing to the covered space is unreachable (`P002`); a wildcard row
//! that is still useful after all arms means the match is non-exhaustive
//! (`P001`), and the witness reconstructed on the way out names a concrete
//! uncovered value.
//!
//! The checker lowers surface patterns into [`Pat`] against a column type
//! [`ColTy`] describing the scrutinee's constructor space. Nullable types
//! behave as a two-constructor space (`nil` and the non-nil payload);
//! classes decompose positionally as single-constructor tuples; `int` and
//! `string` are open spaces that require a wildcard or binding arm.

use sablec_util::{Pos, ReportCode, Reporter, Symbol};

/// A lowered pattern.
#[derive(Clone, Debug)]
pub enum Pat {
    /// Wildcard or binding: matches everything.
    Wild,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Inclusive integer range.
    IntRange(i64, i64),
    /// String literal.
    Str(Symbol),
    /// Float literal (opaque; float spaces are never closed).
    Float(u64),
    /// The nil case of a nullable scrutinee.
    Nil,
    /// The non-nil case of a nullable scrutinee, with the payload pattern.
    NotNil(Box<Pat>),
    /// Enum variant by index, with sub-patterns.
    Variant(u32, Vec<Pat>),
    /// Positional decomposition of a single-constructor value (class).
    Tuple(Vec<Pat>),
    /// Type test; opaque, never completes a space.
    TypeIs(Symbol),
    /// Alternation.
    Or(Vec<Pat>),
}

/// Constructor space of one column.
#[derive(Clone, Debug)]
pub enum ColTy {
    /// Two constructors.
    Bool,
    /// Open integer space.
    Int,
    /// `nil` plus a payload space.
    Nullable(Box<ColTy>),
    /// Closed variant space: name and payload columns per variant.
    Enum(Vec<(Symbol, Vec<ColTy>)>),
    /// Single constructor with positional fields.
    Tuple(Vec<ColTy>),
    /// Anything else: open, wildcard required.
    Open,
}

/// One arm as seen by the exhaustiveness checker.
pub struct ArmPat {
    pub pat: Pat,
    /// Guarded arms are always considered reachable and never contribute
    /// to the covered space.
    pub guarded: bool,
    pub pos: Pos,
}

/// Check one match: reports `P002` per unreachable arm and at most one
/// `P001` with a witness when the arms do not cover the scrutinee.
pub fn check_match(reporter: &Reporter, pos: Pos, col: &ColTy, arms: &[ArmPat]) {
    let tys = vec![col.clone()];
    let mut matrix: Vec<Vec<Pat>> = Vec::new();

    for arm in arms {
        let row = vec![arm.pat.clone()];
        if !arm.guarded && usefulness(&matrix, &row, &tys).is_none() {
            reporter.warning(ReportCode::P002, "unreachable pattern", arm.pos);
        }
        if !arm.guarded {
            matrix.push(row);
        }
    }

    if let Some(witness) = usefulness(&matrix, &[Pat::Wild], &tys) {
        let shown = witness.first().cloned().unwrap_or_else(|| "_".to_owned());
        reporter.error(
            ReportCode::P001,
            format!("non-exhaustive match: pattern '{}' not covered", shown),
            pos,
        );
    }
}

/// A constructor head observed or enumerable in a column.
#[derive(Clone, Debug, PartialEq)]
enum Ctor {
    Bool(bool),
    IntVal(i64),
    IntRange(i64, i64),
    StrVal(Symbol),
    FloatBits(u64),
    Nil,
    NotNil,
    Variant(u32),
    Tuple,
    TypeIs(Symbol),
}

impl Ctor {
    fn of(pat: &Pat) -> Option<Ctor> {
        match pat {
            Pat::Wild | Pat::Or(_) => None,
            Pat::Bool(b) => Some(Ctor::Bool(*b)),
            Pat::Int(n) => Some(Ctor::IntVal(*n)),
            Pat::IntRange(a, b) => Some(Ctor::IntRange(*a, *b)),
            Pat::Str(s) => Some(Ctor::StrVal(*s)),
            Pat::Float(bits) => Some(Ctor::FloatBits(*bits)),
            Pat::Nil => Some(Ctor::Nil),
            Pat::NotNil(_) => Some(Ctor::NotNil),
            Pat::Variant(idx, _) => Some(Ctor::Variant(*idx)),
            Pat::Tuple(_) => Some(Ctor::Tuple),
            Pat::TypeIs(name) => Some(Ctor::TypeIs(*name)),
        }
    }
}

/// Sub-column types a constructor exposes.
fn ctor_sub_tys(ctor: &Ctor, col: &ColTy) -> Vec<ColTy> {
    match (ctor, col) {
        (Ctor::NotNil, ColTy::Nullable(inner)) => vec![(**inner).clone()],
        (Ctor::Variant(idx), ColTy::Enum(variants)) => variants
            .get(*idx as usize)
            .map(|(_, payload)| payload.clone())
            .unwrap_or_default(),
        (Ctor::Tuple, ColTy::Tuple(fields)) => fields.clone(),
        _ => Vec::new(),
    }
}

/// The complete constructor set of a column, or `None` for open spaces.
fn constructors_of(col: &ColTy) -> Option<Vec<Ctor>> {
    match col {
        ColTy::Bool => Some(vec![Ctor::Bool(false), Ctor::Bool(true)]),
        ColTy::Nullable(_) => Some(vec![Ctor::Nil, Ctor::NotNil]),
        ColTy::Enum(variants) => Some(
            (0..variants.len() as u32)
                .map(Ctor::Variant)
                .collect(),
        ),
        ColTy::Tuple(_) => Some(vec![Ctor::Tuple]),
        ColTy::Int | ColTy::Open => None,
    }
}

/// Does a concrete pattern head match a constructor during
/// specialization? (Ranges admit the values they contain.)
fn head_matches(head: &Pat, ctor: &Ctor) -> bool {
    match (Ctor::of(head), ctor) {
        (Some(Ctor::IntRange(a, b)), Ctor::IntVal(n)) => *n >= a && *n <= b,
        (Some(Ctor::IntVal(n)), Ctor::IntRange(a, b)) => n >= *a && n <= *b,
        (Some(h), c) => h == *c,
        (None, _) => true,
    }
}

/// Expand or-pattern heads into separate rows.
fn expand_rows(rows: &[Vec<Pat>]) -> Vec<Vec<Pat>> {
    let mut out = Vec::new();
    for row in rows {
        match row.first() {
            Some(Pat::Or(alts)) => {
                for alt in alts {
                    let mut expanded = vec![alt.clone()];
                    expanded.extend(row[1..].iter().cloned());
                    out.extend(expand_rows(&[expanded]));
                }
            }
            _ => out.push(row.clone()),
        }
    }
    out
}

/// Specialize a matrix by a head constructor with the given arity.
fn specialize(rows: &[Vec<Pat>], ctor: &Ctor, arity: usize) -> Vec<Vec<Pat>> {
    let mut out = Vec::new();
    for row in expand_rows(rows) {
        let head = row.first().expect("specialize on empty row");
        match head {
            Pat::Wild => {
                let mut new_row = vec![Pat::Wild; arity];
                new_row.extend(row[1..].iter().cloned());
                out.push(new_row);
            }
            _ if head_matches(head, ctor) => {
                let subs: Vec<Pat> = match head {
                    Pat::NotNil(inner) => vec![(**inner).clone()],
                    Pat::Variant(_, subs) | Pat::Tuple(subs) => subs.clone(),
                    // Matching literal heads (incl. ranges admitting the
                    // value) expose no sub-patterns beyond wildcards.
                    _ => vec![Pat::Wild; arity],
                };
                debug_assert_eq!(subs.len(), arity);
                let mut new_row = subs;
                new_row.extend(row[1..].iter().cloned());
                out.push(new_row);
            }
            _ => {}
        }
    }
    out
}

/// Rows whose head admits anything (wildcards), heads dropped.
fn default_matrix(rows: &[Vec<Pat>]) -> Vec<Vec<Pat>> {
    expand_rows(rows)
        .into_iter()
        .filter(|row| matches!(row.first(), Some(Pat::Wild)))
        .map(|row| row[1..].to_vec())
        .collect()
}

/// Render a constructor as a witness string with wildcard arguments.
fn render_ctor(ctor: &Ctor, col: &ColTy, args: &[String]) -> String {
    match ctor {
        Ctor::Bool(b) => b.to_string(),
        Ctor::IntVal(n) => n.to_string(),
        Ctor::IntRange(a, b) => format!("{}..{}", a, b),
        Ctor::StrVal(s) => format!("\"{}\"", s),
        Ctor::FloatBits(bits) => format!("{}", f64::from_bits(*bits)),
        Ctor::Nil => "nil".to_owned(),
        Ctor::NotNil => args.first().cloned().unwrap_or_else(|| "_".to_owned()),
        Ctor::Variant(idx) => {
            let name = match col {
                ColTy::Enum(variants) => variants
                    .get(*idx as usize)
                    .map(|(n, _)| n.as_str())
                    .unwrap_or("_"),
                _ => "_",
            };
            if args.is_empty() {
                name.to_owned()
            } else {
                format!("{}({})", name, args.join(", "))
            }
        }
        Ctor::Tuple => format!("({})", args.join(", ")),
        Ctor::TypeIs(name) => format!("is {}", name),
    }
}

/// An integer value not covered by any literal or range head. The search
/// is bounded; a pathological cover of the low non-negatives falls back to
/// the minimum value.
fn uncovered_int(rows: &[Vec<Pat>]) -> i64 {
    let expanded = expand_rows(rows);
    let covered = |n: i64| {
        expanded.iter().any(|row| match row.first() {
            Some(Pat::Int(v)) => *v == n,
            Some(Pat::IntRange(a, b)) => n >= *a && n <= *b,
            _ => false,
        })
    };
    (0..10_000).find(|&n| !covered(n)).unwrap_or(i64::MIN)
}

/// Is `v` useful with respect to `matrix`? Returns a witness (one string
/// per column) for the value space `v` still covers, or `None` when `v`
/// adds nothing.
fn usefulness(matrix: &[Vec<Pat>], v: &[Pat], tys: &[ColTy]) -> Option<Vec<String>> {
    if v.is_empty() {
        return if matrix.is_empty() {
            Some(Vec::new())
        } else {
            None
        };
    }

    let head = &v[0];
    let col = tys.first().cloned().unwrap_or(ColTy::Open);

    match head {
        Pat::Or(alts) => {
            for alt in alts {
                let mut row = vec![alt.clone()];
                row.extend(v[1..].iter().cloned());
                if let Some(w) = usefulness(matrix, &row, tys) {
                    return Some(w);
                }
            }
            None
        }
        Pat::Wild => {
            let complete = constructors_of(&col);
            let observed: Vec<Ctor> = expand_rows(matrix)
                .iter()
                .filter_map(|row| row.first().and_then(Ctor::of))
                .collect();

            if let Some(all) = &complete {
                let all_covered = all.iter().all(|c| observed.iter().any(|o| o == c));
                if all_covered {
                    // Every constructor appears: recurse under each.
                    for ctor in all {
                        let sub_tys = ctor_sub_tys(ctor, &col);
                        let arity = sub_tys.len();
                        let specialized = specialize(matrix, ctor, arity);
                        let mut new_v = vec![Pat::Wild; arity];
                        new_v.extend(v[1..].iter().cloned());
                        let mut new_tys = sub_tys;
                        new_tys.extend(tys[1..].iter().cloned());
                        if let Some(w) = usefulness(&specialized, &new_v, &new_tys) {
                            let (args, rest) = w.split_at(arity);
                            let mut out = vec![render_ctor(ctor, &col, args)];
                            out.extend(rest.iter().cloned());
                            return Some(out);
                        }
                    }
                    return None;
                }
                // Some constructor is missing: the default matrix decides,
                // and the missing constructor names the witness.
                let rest = usefulness(&default_matrix(matrix), &v[1..], &tys[1..])?;
                let missing = all
                    .iter()
                    .find(|c| !observed.iter().any(|o| o == *c))
                    .expect("incomplete cover has a missing constructor");
                let arity = ctor_sub_tys(missing, &col).len();
                let args = vec!["_".to_owned(); arity];
                let mut out = vec![render_ctor(missing, &col, &args)];
                out.extend(rest);
                return Some(out);
            }

            // Open space: useful unless a wildcard row already covers it.
            let rest = usefulness(&default_matrix(matrix), &v[1..], &tys[1..])?;
            let witness = match col {
                ColTy::Int => uncovered_int(matrix).to_string(),
                _ => "_".to_owned(),
            };
            let mut out = vec![witness];
            out.extend(rest);
            Some(out)
        }
        _ => {
            let ctor = Ctor::of(head).expect("concrete head has a constructor");
            let subs: Vec<Pat> = match head {
                Pat::NotNil(inner) => vec![(**inner).clone()],
                Pat::Variant(_, subs) | Pat::Tuple(subs) => subs.clone(),
                _ => Vec::new(),
            };
            let arity = subs.len();
            let specialized = specialize(matrix, &ctor, arity);
            let mut new_v = subs;
            new_v.extend(v[1..].iter().cloned());
            let mut new_tys = ctor_sub_tys(&ctor, &col);
            new_tys.extend(tys[1..].iter().cloned());
            let w = usefulness(&specialized, &new_v, &new_tys)?;
            let (args, rest) = w.split_at(arity);
            let mut out = vec![render_ctor(&ctor, &col, args)];
            out.extend(rest.iter().cloned());
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option_int() -> ColTy {
        ColTy::Enum(vec![
            (Symbol::intern("Some"), vec![ColTy::Int]),
            (Symbol::intern("None"), vec![]),
        ])
    }

    fn run(col: &ColTy, arms: Vec<(Pat, bool)>) -> Reporter {
        let reporter = Reporter::new();
        let arms: Vec<ArmPat> = arms
            .into_iter()
            .map(|(pat, guarded)| ArmPat {
                pat,
                guarded,
                pos: Pos::dummy(),
            })
            .collect();
        check_match(&reporter, Pos::dummy(), col, &arms);
        reporter
    }

    fn p001_messages(reporter: &Reporter) -> Vec<String> {
        reporter
            .diagnostics()
            .into_iter()
            .filter(|d| d.code == ReportCode::P001)
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn test_option_missing_none() {
        let reporter = run(
            &option_int(),
            vec![(Pat::Variant(0, vec![Pat::Wild]), false)],
        );
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("'None'"), "witness was: {}", msgs[0]);
    }

    #[test]
    fn test_option_complete() {
        let reporter = run(
            &option_int(),
            vec![
                (Pat::Variant(0, vec![Pat::Wild]), false),
                (Pat::Variant(1, vec![]), false),
            ],
        );
        assert!(p001_messages(&reporter).is_empty());
    }

    #[test]
    fn test_wildcard_completes_anything() {
        let reporter = run(&option_int(), vec![(Pat::Wild, false)]);
        assert!(p001_messages(&reporter).is_empty());
    }

    #[test]
    fn test_bool_requires_both() {
        let reporter = run(&ColTy::Bool, vec![(Pat::Bool(true), false)]);
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("false"));

        let reporter = run(
            &ColTy::Bool,
            vec![(Pat::Bool(true), false), (Pat::Bool(false), false)],
        );
        assert!(p001_messages(&reporter).is_empty());
    }

    #[test]
    fn test_int_needs_wildcard() {
        let reporter = run(
            &ColTy::Int,
            vec![(Pat::Int(0), false), (Pat::IntRange(1, 9), false)],
        );
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        // Witness is a concrete uncovered integer.
        assert!(msgs[0].contains("'10'"), "witness was: {}", msgs[0]);
    }

    #[test]
    fn test_nullable_space() {
        let col = ColTy::Nullable(Box::new(ColTy::Int));
        let reporter = run(&col, vec![(Pat::Nil, false)]);
        assert_eq!(p001_messages(&reporter).len(), 1);

        let reporter = run(
            &col,
            vec![(Pat::Nil, false), (Pat::NotNil(Box::new(Pat::Wild)), false)],
        );
        assert!(p001_messages(&reporter).is_empty());
    }

    #[test]
    fn test_unreachable_arm() {
        let reporter = run(
            &option_int(),
            vec![
                (Pat::Wild, false),
                (Pat::Variant(1, vec![]), false),
            ],
        );
        let warnings: Vec<_> = reporter
            .diagnostics()
            .into_iter()
            .filter(|d| d.code == ReportCode::P002)
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_guarded_arm_does_not_cover() {
        // `case Some(x) if g: ...; case None: ...` leaves Some uncovered.
        let reporter = run(
            &option_int(),
            vec![
                (Pat::Variant(0, vec![Pat::Wild]), true),
                (Pat::Variant(1, vec![]), false),
            ],
        );
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("Some"));
    }

    #[test]
    fn test_or_patterns_cover_jointly() {
        let reporter = run(
            &ColTy::Bool,
            vec![(
                Pat::Or(vec![Pat::Bool(true), Pat::Bool(false)]),
                false,
            )],
        );
        assert!(p001_messages(&reporter).is_empty());
    }

    #[test]
    fn test_nested_variant_witness() {
        // Result<Option-ish, _> shaped: Ok(Some(_)) | Err(_) misses
        // Ok(None).
        let inner = option_int();
        let col = ColTy::Enum(vec![
            (Symbol::intern("Ok"), vec![inner]),
            (Symbol::intern("Err"), vec![ColTy::Open]),
        ]);
        let reporter = run(
            &col,
            vec![
                (
                    Pat::Variant(0, vec![Pat::Variant(0, vec![Pat::Wild])]),
                    false,
                ),
                (Pat::Variant(1, vec![Pat::Wild]), false),
            ],
        );
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("Ok(None)"), "witness was: {}", msgs[0]);
    }

    #[test]
    fn test_tuple_decomposition() {
        // A two-field class: (bool, bool) covered only for true heads.
        let col = ColTy::Tuple(vec![ColTy::Bool, ColTy::Bool]);
        let reporter = run(
            &col,
            vec![(Pat::Tuple(vec![Pat::Bool(true), Pat::Wild]), false)],
        );
        let msgs = p001_messages(&reporter);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("false"));
    }

    #[test]
    fn test_range_reachability() {
        // 0..9 then literal 5 is unreachable.
        let reporter = run(
            &ColTy::Int,
            vec![
                (Pat::IntRange(0, 9), false),
                (Pat::Int(5), false),
                (Pat::Wild, false),
            ],
        );
        let warnings: Vec<_> = reporter
            .diagnostics()
            .into_iter()
            .filter(|d| d.code == ReportCode::P002)
            .collect();
        assert_eq!(warnings.len(), 1);
    }
}
