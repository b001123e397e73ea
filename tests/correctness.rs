use approx::assert_relative_eq;
use dimvar::ops::{Equal, Less, MaxEquals, Plus, PlusEquals, Sqrt, Times};
use dimvar::{
    accumulate_in_place, transform, transform2, transform2_in_place, DType, Dim, Dimensions,
    Error, Unit, Variable, VariableError,
};

fn dims(pairs: &[(&str, i64)]) -> Dimensions {
    let pairs: Vec<(Dim, i64)> = pairs.iter().map(|&(n, e)| (Dim::new(n), e)).collect();
    Dimensions::from_pairs(&pairs).unwrap()
}

fn linspace(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

#[test]
fn view_chain_then_transform() {
    // Slice, transpose and broadcast are metadata; a transform reads the
    // logical elements and packs a fresh buffer.
    let a = Variable::new(dims(&[("y", 3), ("x", 4)]), Unit::M, linspace(12), None).unwrap();
    let sliced = a.slice(Dim::new("x"), 1, 3).unwrap();
    let transposed = sliced.transpose(&[]).unwrap();
    let doubled = transform2(&Plus, &transposed, &transposed).unwrap();
    assert_eq!(doubled.dims(), &dims(&[("x", 2), ("y", 3)]));
    let mut expected = Vec::new();
    for x in 1..3 {
        for y in 0..3 {
            expected.push(2.0 * (y * 4 + x) as f64);
        }
    }
    assert_eq!(doubled.values::<f64>().unwrap(), expected);
}

#[test]
fn value_equality_ignores_layout_and_sharing() {
    let a = Variable::new(dims(&[("y", 2), ("x", 2)]), Unit::M, linspace(4), None).unwrap();
    let b = a.deep_copy().unwrap().transpose(&[]).unwrap().transpose(&[]).unwrap();
    assert_eq!(a, b);
    assert!(!a.is_same(&b));
    let view = a.clone();
    assert!(a.is_same(&view));
}

#[test]
fn shared_buffer_mutation_is_visible_through_views() {
    let a = Variable::new(dims(&[("x", 4)]), Unit::M, linspace(4), None).unwrap();
    let tail = a.slice(Dim::new("x"), 2, 4).unwrap();
    let patch = Variable::new(dims(&[("x", 2)]), Unit::M, vec![9.0, 9.0], None).unwrap();
    tail.set_slice(Dim::new("x"), 0, 2, &patch).unwrap();
    assert_eq!(a.values::<f64>().unwrap(), vec![0.0, 1.0, 9.0, 9.0]);
}

#[test]
fn readonly_views_protect_shared_data() {
    let a = Variable::new(dims(&[("x", 2)]), Unit::M, vec![1.0, 2.0], None).unwrap();
    let frozen = a.readonly_view();
    assert!(matches!(
        transform2_in_place(&Plus, &frozen, &a),
        Err(Error::Variable(VariableError::Readonly))
    ));
    // The writable handle still works.
    transform2_in_place(&Plus, &a, &a).unwrap();
    assert_eq!(frozen.values::<f64>().unwrap(), vec![2.0, 4.0]);
}

#[test]
fn unit_and_variance_propagation_through_a_pipeline() {
    // counts / time, then sqrt of the product with itself.
    let counts = Variable::new(dims(&[("x", 2)]), Unit::COUNTS, vec![100.0, 400.0], None).unwrap();
    counts
        .set_variances::<f64>(Some(vec![100.0, 400.0]))
        .unwrap();
    let squared = transform2(&Times, &counts, &counts).unwrap();
    assert_eq!(squared.unit(), (Unit::COUNTS * Unit::COUNTS).unwrap());
    let back = transform(&Sqrt, &squared).unwrap();
    assert_eq!(back.unit(), Unit::COUNTS);
    let values = back.values::<f64>().unwrap();
    assert_relative_eq!(values[0], 100.0);
    assert_relative_eq!(values[1], 400.0);
    // var(x*x) = 4 x^2 var(x); var(sqrt(y)) = var(y) / (4 y).
    let variances = back.variances::<f64>().unwrap();
    assert_relative_eq!(variances[0], 100.0);
    assert_relative_eq!(variances[1], 400.0);
}

#[test]
fn comparison_chain_produces_masks() {
    let a = Variable::new(dims(&[("x", 4)]), Unit::M, vec![1.0, 4.0, 2.0, 8.0], None).unwrap();
    let threshold = Variable::scalar(3.0f64, Unit::M);
    let mask = transform2(&Less, &a, &threshold).unwrap();
    assert_eq!(mask.dtype(), DType::Bool);
    assert_eq!(
        mask.values::<bool>().unwrap(),
        vec![true, false, true, false]
    );
    let same = transform2(&Equal, &mask, &mask).unwrap();
    assert_eq!(same.values::<bool>().unwrap(), vec![true; 4]);
}

#[test]
fn accumulate_histograms_events_per_spectrum() {
    // Reduce a {spectrum, pulse} block into per-spectrum totals.
    let out = Variable::new(dims(&[("spectrum", 3)]), Unit::COUNTS, vec![0.0; 3], None).unwrap();
    let data = Variable::new(
        dims(&[("spectrum", 3), ("pulse", 5)]),
        Unit::COUNTS,
        linspace(15),
        None,
    )
    .unwrap();
    accumulate_in_place(&PlusEquals, &out, &data).unwrap();
    assert_eq!(out.values::<f64>().unwrap(), vec![10.0, 35.0, 60.0]);
}

#[test]
fn accumulate_matches_reference_above_threading_threshold() {
    let n = 60_000usize;
    let values: Vec<f64> = (0..n).map(|i| ((i * 31 + 7) % 4999) as f64).collect();
    let other = Variable::new(dims(&[("x", n as i64)]), Unit::NONE, values.clone(), None).unwrap();
    let max_out = Variable::scalar(f64::MIN, Unit::NONE);
    accumulate_in_place(&MaxEquals, &max_out, &other).unwrap();
    let expected_max = values.iter().copied().fold(f64::MIN, f64::max);
    assert_eq!(max_out.value::<f64>().unwrap(), expected_max);

    let sum_out = Variable::scalar(0.0f64, Unit::NONE);
    accumulate_in_place(&PlusEquals, &sum_out, &other).unwrap();
    let expected_sum: f64 = values.iter().sum();
    assert_relative_eq!(sum_out.value::<f64>().unwrap(), expected_sum);
}

#[test]
fn failed_transform_leaves_operands_untouched() {
    let a = Variable::new(dims(&[("x", 2)]), Unit::M, vec![1.0, 2.0], None).unwrap();
    a.set_variances::<f64>(Some(vec![0.1, 0.2])).unwrap();
    let b = Variable::new(dims(&[("x", 2)]), Unit::S, vec![3.0, 4.0], None).unwrap();
    assert!(transform2_in_place(&Plus, &a, &b).is_err());
    assert_eq!(a.values::<f64>().unwrap(), vec![1.0, 2.0]);
    assert_eq!(a.variances::<f64>().unwrap(), vec![0.1, 0.2]);
}

#[test]
fn binned_pipeline_scales_and_extracts_buckets() {
    let events = Variable::new(
        dims(&[("event", 6)]),
        Unit::COUNTS,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        None,
    )
    .unwrap();
    let binned = Variable::binned(
        dims(&[("spectrum", 3)]),
        vec![(0, 2), (2, 2), (2, 6)],
        Dim::new("event"),
        events,
    )
    .unwrap();
    assert_eq!(
        binned.bin_sizes().unwrap().values::<i64>().unwrap(),
        vec![2, 0, 4]
    );
    let scale = Variable::new(
        dims(&[("spectrum", 3)]),
        Unit::NONE,
        vec![1.0, 1.0, 10.0],
        None,
    )
    .unwrap();
    let scaled = transform2(&Times, &binned, &scale).unwrap();
    assert_eq!(scaled.bin_ranges().unwrap(), vec![(0, 2), (2, 2), (2, 6)]);
    assert_eq!(
        scaled.bin_at(2).unwrap().values::<f64>().unwrap(),
        vec![30.0, 40.0, 50.0, 60.0]
    );
    // Outer slicing of the result is still zero-copy.
    let tail = scaled.slice(Dim::new("spectrum"), 1, 3).unwrap();
    assert_eq!(
        tail.bin_sizes().unwrap().values::<i64>().unwrap(),
        vec![0, 4]
    );
}

#[test]
fn binned_plus_binned_respects_bucket_alignment() {
    let make = |values: Vec<f64>| {
        Variable::binned(
            dims(&[("y", 2)]),
            vec![(0, 1), (1, 3)],
            Dim::new("event"),
            Variable::new(dims(&[("event", 3)]), Unit::COUNTS, values, None).unwrap(),
        )
        .unwrap()
    };
    let a = make(vec![1.0, 2.0, 3.0]);
    let b = make(vec![10.0, 20.0, 30.0]);
    let c = transform2(&Plus, &a, &b).unwrap();
    assert_eq!(
        c.bin_inner().unwrap().values::<f64>().unwrap(),
        vec![11.0, 22.0, 33.0]
    );
    assert_eq!(c, make(vec![11.0, 22.0, 33.0]));
}

#[test]
fn fold_and_flatten_reshape_without_copy() {
    let a = Variable::new(dims(&[("x", 6)]), Unit::M, linspace(6), None).unwrap();
    let folded = a
        .fold(Dim::new("x"), &dims(&[("y", 2), ("x", 3)]))
        .unwrap();
    assert_eq!(folded.dims(), &dims(&[("y", 2), ("x", 3)]));
    let flat = folded
        .flatten(&[Dim::new("y"), Dim::new("x")], Dim::new("z"))
        .unwrap();
    assert_eq!(flat.values::<f64>().unwrap(), linspace(6));
    // Round trip shares the original buffer.
    let patch = Variable::new(dims(&[("z", 1)]), Unit::M, vec![42.0], None).unwrap();
    flat.set_slice(Dim::new("z"), 0, 1, &patch).unwrap();
    assert_eq!(a.values::<f64>().unwrap()[0], 42.0);
}
