use tensorctx_core::{tensor_overhead, Context, ContextParams, DType, Error, TENSOR_HEADER_SIZE};

fn ctx(mem_size: usize) -> Context {
    Context::new(ContextParams::new(mem_size)).unwrap()
}

#[test]
fn tensor_layout() {
    let mut ctx = ctx(1 << 16);
    let t = ctx.new_tensor_3d(DType::I32, 2, 3, 4).unwrap();
    let meta = ctx.meta(t).unwrap();
    assert_eq!(meta.shape(), &[2, 3, 4]);
    assert_eq!(meta.strides(), &[12, 4, 1]);
    assert_eq!(meta.nbytes(), 2 * 3 * 4 * 4);
    assert_eq!(meta.n_elements(), 24);
    assert_eq!(meta.row_len(), 4);
    assert_eq!(meta.n_rows(), 6);
    assert!(meta.is_leaf());
    assert!(meta.is_contiguous());
    assert_eq!(ctx.data::<i32>(t).unwrap(), &[0; 24]);

    let u = ctx.new_tensor_1d(DType::U8, 5).unwrap();
    assert_eq!((t.index(), u.index()), (0, 1));
    assert_eq!(ctx.meta(u).unwrap().n_rows(), 1);
}

#[test]
fn out_of_memory_leaves_prior_tensors_untouched() {
    let mut ctx = ctx(2 * tensor_overhead() + 64);
    let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
    ctx.load(a, &[1f32, 2., 3., 4.]).unwrap();
    let used = ctx.used();

    let err = ctx.new_tensor_1d(DType::F32, 1024).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }), "{err}");
    assert_eq!(ctx.used(), used);
    assert_eq!(ctx.n_tensors(), 1);
    assert_eq!(ctx.data::<f32>(a).unwrap(), &[1., 2., 3., 4.]);

    // smaller requests still fit
    ctx.new_tensor_1d(DType::F32, 4).unwrap();
}

#[test]
fn header_alone_can_exhaust_the_arena() {
    let mut ctx = ctx(TENSOR_HEADER_SIZE);
    assert!(matches!(
        ctx.new_tensor_1d(DType::U8, 1),
        Err(Error::OutOfMemory { .. })
    ));
    assert_eq!(ctx.used(), 0);
}

#[test]
fn load_size_mismatch_writes_nothing() {
    let mut ctx = ctx(1 << 16);
    let a = ctx.new_tensor_2d(DType::F32, 2, 2).unwrap();
    ctx.load(a, &[1f32, 2., 3., 4.]).unwrap();

    let err = ctx.load(a, &[9f32, 9., 9.]).unwrap_err();
    assert!(matches!(
        err,
        Error::SizeMismatch {
            expected: 16,
            got: 12,
            ..
        }
    ));
    let err = ctx.load_bytes(a, &[0u8; 17]).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { got: 17, .. }));
    assert_eq!(ctx.data::<f32>(a).unwrap(), &[1., 2., 3., 4.]);
}

#[test]
fn typed_access_checks_dtype() {
    let mut ctx = ctx(1 << 16);
    let a = ctx.new_tensor_1d(DType::F64, 2).unwrap();
    assert!(matches!(
        ctx.load(a, &[1f32, 2., 3., 4.]),
        Err(Error::DTypeMismatch { .. })
    ));
    assert!(matches!(
        ctx.data::<i64>(a),
        Err(Error::DTypeMismatch { .. })
    ));
    ctx.load_bytes(a, &f64_bytes(&[1.5, -2.0])).unwrap();
    assert_eq!(ctx.data::<f64>(a).unwrap(), &[1.5, -2.0]);
}

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

#[test]
fn reshape_shares_payload() {
    let mut ctx = ctx(1 << 16);
    let a = ctx.new_tensor_2d(DType::U32, 2, 3).unwrap();
    ctx.load(a, &[0u32, 1, 2, 3, 4, 5]).unwrap();
    let v = ctx.reshape(a, &[3, 2]).unwrap();

    let meta = ctx.meta(v).unwrap();
    assert_eq!(meta.view_src(), Some(a));
    assert!(!meta.is_leaf());
    assert_eq!(meta.offset(), ctx.meta(a).unwrap().offset());
    assert_eq!(
        ctx.to_vec2::<u32>(v).unwrap(),
        vec![vec![0, 1], vec![2, 3], vec![4, 5]]
    );

    ctx.load(v, &[5u32, 4, 3, 2, 1, 0]).unwrap();
    assert_eq!(ctx.data::<u32>(a).unwrap(), &[5, 4, 3, 2, 1, 0]);
}

#[test]
fn reshape_rejects_element_count_change() {
    let mut ctx = ctx(1 << 16);
    let a = ctx.new_tensor_2d(DType::F32, 2, 3).unwrap();
    let err = ctx.reshape(a, &[4, 2]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert!(err.to_string().contains("reshape"));
}

#[test]
fn invalid_shapes() {
    let mut ctx = ctx(1 << 16);
    let shapes: [&[usize]; 3] = [&[], &[1, 2, 3, 4, 5], &[3, 0]];
    for shape in shapes {
        assert!(matches!(
            ctx.new_tensor(DType::F32, shape),
            Err(Error::InvalidShape { .. })
        ));
    }
    assert_eq!(ctx.used(), 0);
}

#[test]
fn foreign_handles_are_rejected() {
    let mut first = ctx(1 << 16);
    let mut second = ctx(1 << 16);
    let a = first.new_tensor_1d(DType::F32, 4).unwrap();
    let neg = first.neg(a).unwrap();
    let op = first.meta(neg).unwrap().producer().unwrap();

    // same indices, different owner
    let b = second.new_tensor_1d(DType::F32, 4).unwrap();
    second.neg(b).unwrap();
    assert_eq!(a.index(), b.index());
    assert_ne!(a, b);

    assert!(matches!(second.meta(a), Err(Error::UnknownTensor(t)) if t == a));
    assert!(matches!(second.data::<f32>(a), Err(Error::UnknownTensor(_))));
    assert!(matches!(second.load(a, &[1f32; 4]), Err(Error::UnknownTensor(_))));
    assert!(matches!(second.set_name(a, "a"), Err(Error::UnknownTensor(_))));
    assert!(matches!(second.add(a, b), Err(Error::UnknownTensor(_))));
    assert!(matches!(second.op(op), Err(Error::UnknownOp(_))));
    assert!(matches!(
        second.build_forward(neg),
        Err(Error::UnknownTensor(_))
    ));
    assert_eq!(second.data::<f32>(b).unwrap(), &[0.; 4]);
}

#[test]
fn names() {
    let mut ctx = ctx(1 << 16);
    let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
    assert_eq!(ctx.name(a).unwrap(), None);
    ctx.set_name(a, "weights").unwrap();
    assert_eq!(ctx.name(a).unwrap(), Some("weights"));
}

#[test]
fn free_releases_everything() {
    let mut ctx = ctx(1 << 16);
    ctx.new_tensor_1d(DType::F32, 4).unwrap();
    assert!(ctx.used() > 0);
    assert_eq!(ctx.remaining(), ctx.capacity() - ctx.used());
    ctx.free();
}
